//! BPMN model emission stage.
//!
//! Serializes a discovered workflow into a BPMN 2.0 XML document:
//! - One service task per process node, one start event, end events per the
//!   configured policy
//! - Exclusive gateway pairs for choices, parallel fork/join pairs for
//!   parallel splits
//! - Back edges as annotated, back-pointing sequence flows
//! - Mining metadata (frequencies, durations, quality scores) as
//!   documentation elements
//!
//! Every `sourceRef`/`targetRef` is checked against the emitted element ids
//! before the document is returned; a dangling reference is a hard error.

use crate::graph::IdAllocator;
use crate::types::{DiscoveredWorkflow, GraphStats, Pattern};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Serialize;
use spanmine_core::{MiningError, MiningStage, Result, StageMetadata};
use std::collections::{HashMap, HashSet};

/// BPMN 2.0 model namespace.
pub const BPMN_NS: &str = "http://www.omg.org/spec/BPMN/20100524/MODEL";

// ============================================================================
// Emission Configuration
// ============================================================================

/// How multiple natural end nodes are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndEventPolicy {
    /// Converge all end nodes through one exclusive gateway into a single
    /// end event.
    #[default]
    Converge,
    /// Emit one end event per end node.
    MultipleEndEvents,
}

/// Configuration for BPMN emission.
#[derive(Debug, Clone)]
pub struct BpmnConfig {
    /// End-node rendering policy.
    pub end_event_policy: EndEventPolicy,
    /// Id of the emitted process element.
    pub process_id: String,
    /// Target namespace on the definitions root.
    pub target_namespace: String,
}

impl Default for BpmnConfig {
    fn default() -> Self {
        Self {
            end_event_policy: EndEventPolicy::Converge,
            process_id: "discovered_process".to_string(),
            target_namespace: "http://spanmine.dev/processes".to_string(),
        }
    }
}

// ============================================================================
// Document Model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementKind {
    StartEvent,
    EndEvent,
    ServiceTask,
    ExclusiveGateway,
    ParallelGateway,
}

impl ElementKind {
    fn tag(self) -> &'static str {
        match self {
            ElementKind::StartEvent => "startEvent",
            ElementKind::EndEvent => "endEvent",
            ElementKind::ServiceTask => "serviceTask",
            ElementKind::ExclusiveGateway => "exclusiveGateway",
            ElementKind::ParallelGateway => "parallelGateway",
        }
    }
}

#[derive(Debug, Clone)]
struct BpmnElement {
    id: String,
    kind: ElementKind,
    name: Option<String>,
    documentation: Option<String>,
}

#[derive(Debug, Clone)]
struct BpmnFlow {
    id: String,
    source_ref: String,
    target_ref: String,
    name: Option<String>,
    documentation: Option<String>,
}

#[derive(Serialize)]
struct WorkflowSummary<'a> {
    #[serde(flatten)]
    workflow: &'a DiscoveredWorkflow,
    graph_stats: GraphStats,
}

// ============================================================================
// BPMN Emission Stage
// ============================================================================

/// BPMN emission stage.
#[derive(Debug, Clone)]
pub struct BpmnEmission {
    metadata: StageMetadata,
}

impl Default for BpmnEmission {
    fn default() -> Self {
        Self::new()
    }
}

impl BpmnEmission {
    /// Create a new emission stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: StageMetadata::new("mining/bpmn-emission")
                .with_description("BPMN 2.0 XML and JSON summary serialization"),
        }
    }

    /// Emit the workflow as a BPMN 2.0 XML document.
    pub fn emit(workflow: &DiscoveredWorkflow, config: &BpmnConfig) -> Result<String> {
        let (elements, flows) = Self::build_document(workflow, config)?;
        Self::validate_references(&elements, &flows)?;
        Self::write_xml(workflow, config, &elements, &flows)
    }

    /// Emit the workflow with the default configuration.
    pub fn emit_default(workflow: &DiscoveredWorkflow) -> Result<String> {
        Self::emit(workflow, &BpmnConfig::default())
    }

    /// Render the machine-readable JSON summary of the workflow.
    pub fn summary(workflow: &DiscoveredWorkflow) -> Result<String> {
        let summary = WorkflowSummary {
            workflow,
            graph_stats: workflow.graph.stats(),
        };
        serde_json::to_string_pretty(&summary)
            .map_err(|e| MiningError::serialization(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Document construction
    // ------------------------------------------------------------------

    fn build_document(
        workflow: &DiscoveredWorkflow,
        config: &BpmnConfig,
    ) -> Result<(Vec<BpmnElement>, Vec<BpmnFlow>)> {
        let graph = &workflow.graph;
        let mut ids = IdAllocator::new();
        let mut id_of: HashMap<&str, String> = HashMap::new();

        // document-level ids participate in the same uniqueness domain
        ids.allocate("definitions_1")?;
        ids.allocate(&config.process_id)?;

        let mut elements = Vec::new();
        for node in &graph.nodes {
            let allocated = ids.allocate(&node.id)?;
            if allocated != node.id {
                // the graph builder guarantees unique ids; a duplicate here
                // means the workflow was assembled by hand
                return Err(MiningError::IdCollision {
                    id: node.id.clone(),
                });
            }
            id_of.insert(node.name.as_str(), node.id.clone());
            elements.push(BpmnElement {
                id: node.id.clone(),
                kind: ElementKind::ServiceTask,
                name: Some(node.name.clone()),
                documentation: Some(format!(
                    "occurrences={} avg_duration_ms={:.1} errors={}",
                    node.occurrence_count, node.average_duration_ms, node.error_count
                )),
            });
        }

        let start_event = ids.allocate("start_event")?;
        elements.push(BpmnElement {
            id: start_event.clone(),
            kind: ElementKind::StartEvent,
            name: None,
            documentation: None,
        });

        let mut flows: Vec<BpmnFlow> = Vec::new();
        let mut flow_count = 0usize;
        let mut push_flow = |flows: &mut Vec<BpmnFlow>,
                             ids: &mut IdAllocator,
                             source: String,
                             target: String,
                             name: Option<String>,
                             documentation: Option<String>|
         -> Result<()> {
            flow_count += 1;
            let id = ids.allocate(&format!("flow_{flow_count}"))?;
            flows.push(BpmnFlow {
                id,
                source_ref: source,
                target_ref: target,
                name,
                documentation,
            });
            Ok(())
        };

        let resolve = |id_of: &HashMap<&str, String>, name: &str| -> Result<String> {
            id_of.get(name).cloned().ok_or_else(|| {
                MiningError::DanglingReference {
                    reference: name.to_string(),
                }
            })
        };

        // Gateway synthesis. Edges routed through a gateway are recorded
        // here and skipped in the plain-edge pass below.
        let mut subsumed: HashSet<(String, String)> = HashSet::new();
        // End nodes whose exit was consumed by a parallel join.
        let mut end_handled: HashSet<String> = HashSet::new();
        // Gateways still waiting for a connection to the end event.
        let mut pending_to_end: Vec<String> = Vec::new();

        for pattern in &workflow.patterns {
            match pattern {
                Pattern::Choice {
                    predecessor,
                    branches,
                    ..
                } => {
                    let pred_id = resolve(&id_of, predecessor)?;
                    let split = ids.allocate(&format!("gw_{pred_id}_split"))?;
                    elements.push(BpmnElement {
                        id: split.clone(),
                        kind: ElementKind::ExclusiveGateway,
                        name: None,
                        documentation: None,
                    });
                    push_flow(&mut flows, &mut ids, pred_id.clone(), split.clone(), None, None)?;
                    for branch in branches {
                        subsumed.insert((predecessor.clone(), branch.clone()));
                        let branch_id = resolve(&id_of, branch)?;
                        push_flow(&mut flows, &mut ids, split.clone(), branch_id, None, None)?;
                    }

                    if let Some(join_target) = graph.common_successor(branches) {
                        let join = ids.allocate(&format!("gw_{pred_id}_join"))?;
                        elements.push(BpmnElement {
                            id: join.clone(),
                            kind: ElementKind::ExclusiveGateway,
                            name: None,
                            documentation: None,
                        });
                        for branch in branches {
                            subsumed.insert((branch.clone(), join_target.clone()));
                            let branch_id = resolve(&id_of, branch)?;
                            push_flow(&mut flows, &mut ids, branch_id, join.clone(), None, None)?;
                        }
                        let target_id = resolve(&id_of, &join_target)?;
                        push_flow(&mut flows, &mut ids, join, target_id, None, None)?;
                    }
                }
                Pattern::Parallel {
                    split: split_node,
                    branches,
                    join,
                } => {
                    let split_id = resolve(&id_of, split_node)?;
                    let fork = ids.allocate(&format!("gw_{split_id}_fork"))?;
                    elements.push(BpmnElement {
                        id: fork.clone(),
                        kind: ElementKind::ParallelGateway,
                        name: None,
                        documentation: None,
                    });
                    push_flow(&mut flows, &mut ids, split_id.clone(), fork.clone(), None, None)?;
                    for branch in branches {
                        subsumed.insert((split_node.clone(), branch.clone()));
                        let branch_id = resolve(&id_of, branch)?;
                        push_flow(&mut flows, &mut ids, fork.clone(), branch_id, None, None)?;
                    }
                    // interleaving successions between co-branches are
                    // expressed by the gateway, not by flows
                    for a in branches {
                        for b in branches {
                            if a != b {
                                subsumed.insert((a.clone(), b.clone()));
                            }
                        }
                    }

                    let all_branches_end = branches
                        .iter()
                        .all(|b| graph.end_nodes.contains(b));
                    if join.is_some() || all_branches_end {
                        let join_gw = ids.allocate(&format!("gw_{split_id}_join"))?;
                        elements.push(BpmnElement {
                            id: join_gw.clone(),
                            kind: ElementKind::ParallelGateway,
                            name: None,
                            documentation: None,
                        });
                        for branch in branches {
                            if let Some(join_target) = join {
                                subsumed.insert((branch.clone(), join_target.clone()));
                            }
                            let branch_id = resolve(&id_of, branch)?;
                            push_flow(&mut flows, &mut ids, branch_id, join_gw.clone(), None, None)?;
                        }
                        match join {
                            Some(join_target) => {
                                let target_id = resolve(&id_of, join_target)?;
                                push_flow(&mut flows, &mut ids, join_gw, target_id, None, None)?;
                            }
                            None => {
                                for branch in branches {
                                    end_handled.insert(branch.clone());
                                }
                                pending_to_end.push(join_gw);
                            }
                        }
                    }
                }
                Pattern::Sequence { .. } | Pattern::Loop { .. } => {}
            }
        }

        // Plain edges. Back edges are always emitted and always annotated,
        // even when a gateway covers the same node pair.
        for edge in &graph.edges {
            if edge.is_back_edge {
                let source_id = resolve(&id_of, &edge.source)?;
                let target_id = resolve(&id_of, &edge.target)?;
                push_flow(
                    &mut flows,
                    &mut ids,
                    source_id,
                    target_id,
                    Some("loop back".to_string()),
                    Some(format!(
                        "Back edge: returns to '{}' (traversed {} times)",
                        edge.target, edge.frequency
                    )),
                )?;
                continue;
            }
            if subsumed.contains(&(edge.source.clone(), edge.target.clone())) {
                continue;
            }
            let source_id = resolve(&id_of, &edge.source)?;
            let target_id = resolve(&id_of, &edge.target)?;
            push_flow(&mut flows, &mut ids, source_id, target_id, None, None)?;
        }

        // Start wiring: one start event; multiple start nodes share one
        // exclusive gateway behind it.
        match graph.start_nodes.len() {
            0 => {}
            1 => {
                let target_id = resolve(&id_of, &graph.start_nodes[0])?;
                push_flow(&mut flows, &mut ids, start_event.clone(), target_id, None, None)?;
            }
            _ => {
                let gw = ids.allocate("gw_start")?;
                elements.push(BpmnElement {
                    id: gw.clone(),
                    kind: ElementKind::ExclusiveGateway,
                    name: None,
                    documentation: None,
                });
                push_flow(&mut flows, &mut ids, start_event.clone(), gw.clone(), None, None)?;
                for node in &graph.start_nodes {
                    let target_id = resolve(&id_of, node)?;
                    push_flow(&mut flows, &mut ids, gw.clone(), target_id, None, None)?;
                }
            }
        }

        // End wiring.
        let mut end_sources: Vec<String> = Vec::new();
        for node in &graph.end_nodes {
            if !end_handled.contains(node) {
                end_sources.push(resolve(&id_of, node)?);
            }
        }
        end_sources.extend(pending_to_end);

        match config.end_event_policy {
            EndEventPolicy::Converge => {
                let end_event = ids.allocate("end_event")?;
                elements.push(BpmnElement {
                    id: end_event.clone(),
                    kind: ElementKind::EndEvent,
                    name: None,
                    documentation: None,
                });
                match end_sources.len() {
                    0 => {}
                    1 => {
                        push_flow(
                            &mut flows,
                            &mut ids,
                            end_sources[0].clone(),
                            end_event,
                            None,
                            None,
                        )?;
                    }
                    _ => {
                        let gw = ids.allocate("gw_end")?;
                        elements.push(BpmnElement {
                            id: gw.clone(),
                            kind: ElementKind::ExclusiveGateway,
                            name: None,
                            documentation: None,
                        });
                        for source in &end_sources {
                            push_flow(&mut flows, &mut ids, source.clone(), gw.clone(), None, None)?;
                        }
                        push_flow(&mut flows, &mut ids, gw, end_event, None, None)?;
                    }
                }
            }
            EndEventPolicy::MultipleEndEvents => {
                if end_sources.is_empty() {
                    let end_event = ids.allocate("end_event")?;
                    elements.push(BpmnElement {
                        id: end_event,
                        kind: ElementKind::EndEvent,
                        name: None,
                        documentation: None,
                    });
                } else {
                    for source in &end_sources {
                        let end_event = ids.allocate("end_event")?;
                        elements.push(BpmnElement {
                            id: end_event.clone(),
                            kind: ElementKind::EndEvent,
                            name: None,
                            documentation: None,
                        });
                        push_flow(&mut flows, &mut ids, source.clone(), end_event, None, None)?;
                    }
                }
            }
        }

        Ok((elements, flows))
    }

    fn validate_references(elements: &[BpmnElement], flows: &[BpmnFlow]) -> Result<()> {
        let ids: HashSet<&str> = elements.iter().map(|e| e.id.as_str()).collect();
        for flow in flows {
            for reference in [&flow.source_ref, &flow.target_ref] {
                if !ids.contains(reference.as_str()) {
                    return Err(MiningError::DanglingReference {
                        reference: reference.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // XML serialization
    // ------------------------------------------------------------------

    fn write_xml(
        workflow: &DiscoveredWorkflow,
        config: &BpmnConfig,
        elements: &[BpmnElement],
        flows: &[BpmnFlow],
    ) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        let err = |e: &dyn std::fmt::Display| MiningError::emit(e.to_string());

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| err(&e))?;

        let mut definitions = BytesStart::new("definitions");
        definitions.push_attribute(("xmlns", BPMN_NS));
        definitions.push_attribute(("id", "definitions_1"));
        definitions.push_attribute(("targetNamespace", config.target_namespace.as_str()));
        writer
            .write_event(Event::Start(definitions))
            .map_err(|e| err(&e))?;

        let mut process = BytesStart::new("process");
        process.push_attribute(("id", config.process_id.as_str()));
        process.push_attribute(("isExecutable", "true"));
        writer
            .write_event(Event::Start(process))
            .map_err(|e| err(&e))?;

        let metrics = &workflow.metrics;
        Self::write_documentation(
            &mut writer,
            &format!(
                "completeness={:.3} precision={:.3} fitness={:.3} simplicity={:.3} rejected_spans={}",
                metrics.completeness,
                metrics.precision,
                metrics.fitness,
                metrics.simplicity,
                workflow.rejected_spans
            ),
        )?;

        for element in elements {
            let mut tag = BytesStart::new(element.kind.tag());
            tag.push_attribute(("id", element.id.as_str()));
            if let Some(name) = &element.name {
                tag.push_attribute(("name", name.as_str()));
            }
            match &element.documentation {
                Some(doc) => {
                    writer
                        .write_event(Event::Start(tag))
                        .map_err(|e| err(&e))?;
                    Self::write_documentation(&mut writer, doc)?;
                    writer
                        .write_event(Event::End(BytesEnd::new(element.kind.tag())))
                        .map_err(|e| err(&e))?;
                }
                None => {
                    writer.write_event(Event::Empty(tag)).map_err(|e| err(&e))?;
                }
            }
        }

        for flow in flows {
            let mut tag = BytesStart::new("sequenceFlow");
            tag.push_attribute(("id", flow.id.as_str()));
            tag.push_attribute(("sourceRef", flow.source_ref.as_str()));
            tag.push_attribute(("targetRef", flow.target_ref.as_str()));
            if let Some(name) = &flow.name {
                tag.push_attribute(("name", name.as_str()));
            }
            match &flow.documentation {
                Some(doc) => {
                    writer
                        .write_event(Event::Start(tag))
                        .map_err(|e| err(&e))?;
                    Self::write_documentation(&mut writer, doc)?;
                    writer
                        .write_event(Event::End(BytesEnd::new("sequenceFlow")))
                        .map_err(|e| err(&e))?;
                }
                None => {
                    writer.write_event(Event::Empty(tag)).map_err(|e| err(&e))?;
                }
            }
        }

        writer
            .write_event(Event::End(BytesEnd::new("process")))
            .map_err(|e| err(&e))?;
        writer
            .write_event(Event::End(BytesEnd::new("definitions")))
            .map_err(|e| err(&e))?;

        String::from_utf8(writer.into_inner())
            .map_err(|e| MiningError::emit(e.to_string()))
    }

    fn write_documentation(writer: &mut Writer<Vec<u8>>, text: &str) -> Result<()> {
        let err = |e: &dyn std::fmt::Display| MiningError::emit(e.to_string());
        writer
            .write_event(Event::Start(BytesStart::new("documentation")))
            .map_err(|e| err(&e))?;
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(|e| err(&e))?;
        writer
            .write_event(Event::End(BytesEnd::new("documentation")))
            .map_err(|e| err(&e))?;
        Ok(())
    }
}

impl MiningStage for BpmnEmission {
    fn metadata(&self) -> &StageMetadata {
        &self.metadata
    }
}
