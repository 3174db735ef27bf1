//! Pattern discovery stage.
//!
//! Classifies local graph structures from trace evidence:
//! - Loop detection via first-occurrence back edges
//! - Exclusive choice vs. parallel split classification
//! - Sequence extraction for the remaining forward edges
//!
//! Discovery order is loops, then choices, then parallels, then sequences.
//! When the evidence for a successor set is mixed, the conservative reading
//! wins: the set is classified as a choice and flagged `low_confidence`
//! rather than silently promoted to a concurrency claim.

use crate::types::{Pattern, ProcessGraph, TraceLog};
use spanmine_core::{MiningStage, StageMetadata};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

// ============================================================================
// Pattern Discovery Stage
// ============================================================================

/// Pattern discovery stage.
///
/// Consumes the process graph together with the raw trace log and produces
/// the ordered pattern list. Back edges found during loop detection are
/// stamped onto the graph so later stages can tell repeat flows from forward
/// flows.
#[derive(Debug, Clone)]
pub struct PatternDiscovery {
    metadata: StageMetadata,
}

impl Default for PatternDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

/// Evidence collected for one multi-successor node.
enum SplitEvidence {
    /// Exactly one branch occurred in every trace containing the node.
    Exclusive,
    /// Multiple branches co-occurred and their order varies across traces.
    Concurrent,
    /// Neither purely exclusive nor demonstrably concurrent.
    Mixed,
}

impl PatternDiscovery {
    /// Create a new pattern discovery stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: StageMetadata::new("mining/pattern-discovery")
                .with_description("Sequence/parallel/choice/loop classification"),
        }
    }

    /// Discover patterns and stamp back edges onto the graph.
    pub fn discover(mut graph: ProcessGraph, log: &TraceLog) -> (ProcessGraph, Vec<Pattern>) {
        let (back_edges, loop_bodies) = Self::detect_loops(log);

        for edge in &mut graph.edges {
            if back_edges.contains(&(edge.source.clone(), edge.target.clone())) {
                edge.is_back_edge = true;
            }
        }

        let mut patterns: Vec<Pattern> = loop_bodies
            .into_iter()
            .map(|body| Pattern::Loop { body })
            .collect();

        // First pass: find parallel branch sets so interleaving edges
        // between co-branches do not masquerade as sequences or choices.
        let mut co_parallel: HashMap<String, HashSet<String>> = HashMap::new();
        for node in &graph.nodes {
            let succs = graph.forward_successors(&node.name);
            if succs.len() < 2 {
                continue;
            }
            if matches!(
                Self::split_evidence(&node.name, &succs, log),
                SplitEvidence::Concurrent
            ) {
                for a in &succs {
                    let entry = co_parallel.entry((*a).to_string()).or_default();
                    for b in &succs {
                        if a != b {
                            entry.insert((*b).to_string());
                        }
                    }
                }
            }
        }

        // Second pass: classify every node over its effective successors.
        let mut choices = Vec::new();
        let mut parallels = Vec::new();
        let mut sequences = Vec::new();
        for node in &graph.nodes {
            let mut succs = graph.forward_successors(&node.name);
            if let Some(siblings) = co_parallel.get(&node.name) {
                succs.retain(|s| !siblings.contains(*s));
            }

            match succs.len() {
                0 => {}
                1 => sequences.push(Pattern::Sequence {
                    source: node.name.clone(),
                    target: succs[0].to_string(),
                }),
                _ => {
                    let branches: Vec<String> =
                        succs.iter().map(|s| (*s).to_string()).collect();
                    match Self::split_evidence(&node.name, &succs, log) {
                        SplitEvidence::Exclusive => choices.push(Pattern::Choice {
                            predecessor: node.name.clone(),
                            branches,
                            low_confidence: false,
                        }),
                        SplitEvidence::Concurrent => {
                            let join = graph.common_successor(&branches);
                            parallels.push(Pattern::Parallel {
                                split: node.name.clone(),
                                branches,
                                join,
                            });
                        }
                        SplitEvidence::Mixed => choices.push(Pattern::Choice {
                            predecessor: node.name.clone(),
                            branches,
                            low_confidence: true,
                        }),
                    }
                }
            }
        }

        patterns.extend(choices);
        patterns.extend(parallels);
        patterns.extend(sequences);

        tracing::debug!(patterns = patterns.len(), "classified patterns");

        (graph, patterns)
    }

    /// Detect back edges and loop bodies across all traces.
    ///
    /// Within a trace, the succession `(u, v)` closes a cycle when the first
    /// occurrence of `v` precedes the first occurrence of `u` (self-loops
    /// included). The loop body is the task subsequence spanning those first
    /// occurrences; bodies are deduplicated across traces.
    #[allow(clippy::type_complexity)]
    fn detect_loops(log: &TraceLog) -> (BTreeSet<(String, String)>, BTreeSet<Vec<String>>) {
        let mut back_edges = BTreeSet::new();
        let mut bodies = BTreeSet::new();

        for trace in log.traces.values() {
            let seq = trace.task_sequence();
            if seq.len() < 2 {
                continue;
            }

            let mut first: HashMap<&str, usize> = HashMap::new();
            for (i, task) in seq.iter().enumerate() {
                first.entry(*task).or_insert(i);
            }

            for i in 0..seq.len() - 1 {
                let (u, v) = (seq[i], seq[i + 1]);
                let (fu, fv) = (first[u], first[v]);
                if fv <= fu {
                    back_edges.insert((u.to_string(), v.to_string()));
                    let body: Vec<String> =
                        seq[fv..=fu].iter().map(|s| (*s).to_string()).collect();
                    bodies.insert(body);
                }
            }
        }

        (back_edges, bodies)
    }

    /// Inspect every trace containing `node` and weigh the successor
    /// evidence.
    fn split_evidence(node: &str, succs: &[&str], log: &TraceLog) -> SplitEvidence {
        let mut exactly_one = true;
        let mut any_multi = false;
        // (a, b) -> (a seen before b, b seen before a)
        let mut pair_orders: BTreeMap<(String, String), (bool, bool)> = BTreeMap::new();

        for trace in log.traces.values() {
            if !trace.contains_task(node) {
                continue;
            }
            let present: Vec<&str> = succs
                .iter()
                .copied()
                .filter(|s| trace.contains_task(s))
                .collect();
            if present.len() != 1 {
                exactly_one = false;
            }
            if present.len() >= 2 {
                any_multi = true;
                for i in 0..present.len() {
                    for j in (i + 1)..present.len() {
                        let (a, b) = (present[i], present[j]);
                        let pa = trace.first_index_of(a).unwrap_or(usize::MAX);
                        let pb = trace.first_index_of(b).unwrap_or(usize::MAX);
                        let entry = pair_orders
                            .entry((a.to_string(), b.to_string()))
                            .or_insert((false, false));
                        if pa < pb {
                            entry.0 = true;
                        } else if pb < pa {
                            entry.1 = true;
                        }
                    }
                }
            }
        }

        let varying_order = pair_orders.values().any(|(ab, ba)| *ab && *ba);

        if exactly_one {
            SplitEvidence::Exclusive
        } else if any_multi && varying_order {
            SplitEvidence::Concurrent
        } else {
            SplitEvidence::Mixed
        }
    }
}

impl MiningStage for PatternDiscovery {
    fn metadata(&self) -> &StageMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::TraceAssembly;
    use crate::graph::GraphConstruction;
    use crate::types::SpanRecord;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn mine_patterns(traces: &[(&str, &[&str])]) -> (ProcessGraph, Vec<Pattern>) {
        let mut spans = Vec::new();
        for (trace_id, tasks) in traces {
            for (i, task) in tasks.iter().enumerate() {
                let start = (i as i64 + 1) * 10;
                spans.push(SpanRecord::new(*trace_id, *task, ts(start), ts(start + 5)));
            }
        }
        let assembly = TraceAssembly::assemble(&spans);
        let graph = GraphConstruction::build(&assembly.log).unwrap();
        PatternDiscovery::discover(graph, &assembly.log)
    }

    #[test]
    fn test_pattern_discovery_metadata() {
        let stage = PatternDiscovery::new();
        assert_eq!(stage.id(), "mining/pattern-discovery");
    }

    #[test]
    fn test_sequence_chain() {
        let (_, patterns) = mine_patterns(&[
            ("t1", &["A", "B", "C"]),
            ("t2", &["A", "B", "C"]),
        ]);

        assert_eq!(patterns.len(), 2);
        assert!(patterns.contains(&Pattern::Sequence {
            source: "A".to_string(),
            target: "B".to_string(),
        }));
        assert!(patterns.contains(&Pattern::Sequence {
            source: "B".to_string(),
            target: "C".to_string(),
        }));
    }

    #[test]
    fn test_exclusive_choice() {
        let (_, patterns) = mine_patterns(&[
            ("t1", &["A", "B"]),
            ("t2", &["A", "C"]),
            ("t3", &["A", "B"]),
        ]);

        let choice = patterns
            .iter()
            .find(|p| matches!(p, Pattern::Choice { .. }))
            .expect("choice pattern");
        match choice {
            Pattern::Choice {
                predecessor,
                branches,
                low_confidence,
            } => {
                assert_eq!(predecessor, "A");
                assert_eq!(branches, &vec!["B".to_string(), "C".to_string()]);
                assert!(!low_confidence);
            }
            _ => unreachable!(),
        }
        assert!(!patterns.iter().any(|p| matches!(p, Pattern::Parallel { .. })));
    }

    #[test]
    fn test_parallel_without_join() {
        let (_, patterns) = mine_patterns(&[
            ("t1", &["A", "B", "C"]),
            ("t2", &["A", "C", "B"]),
        ]);

        let parallel = patterns
            .iter()
            .find(|p| matches!(p, Pattern::Parallel { .. }))
            .expect("parallel pattern");
        match parallel {
            Pattern::Parallel {
                split,
                branches,
                join,
            } => {
                assert_eq!(split, "A");
                assert_eq!(branches, &vec!["B".to_string(), "C".to_string()]);
                assert!(join.is_none());
            }
            _ => unreachable!(),
        }

        // interleaving edges between co-branches must not become sequences
        assert!(!patterns.iter().any(|p| matches!(p, Pattern::Sequence { .. })));
    }

    #[test]
    fn test_parallel_with_join() {
        let (_, patterns) = mine_patterns(&[
            ("t1", &["A", "B", "C", "D"]),
            ("t2", &["A", "C", "B", "D"]),
        ]);

        let parallel = patterns
            .iter()
            .find(|p| matches!(p, Pattern::Parallel { .. }))
            .expect("parallel pattern");
        match parallel {
            Pattern::Parallel { join, .. } => {
                assert_eq!(join.as_deref(), Some("D"));
            }
            _ => unreachable!(),
        }

        // branch exits to the join are plain sequences
        assert!(patterns.contains(&Pattern::Sequence {
            source: "B".to_string(),
            target: "D".to_string(),
        }));
        assert!(patterns.contains(&Pattern::Sequence {
            source: "C".to_string(),
            target: "D".to_string(),
        }));
    }

    #[test]
    fn test_mixed_evidence_is_low_confidence_choice() {
        // B and C co-occur in one trace but never in swapped order, and one
        // trace sees neither; evidence is neither exclusive nor concurrent.
        let (_, patterns) = mine_patterns(&[
            ("t1", &["A", "B", "C"]),
            ("t2", &["A", "B"]),
            ("t3", &["A", "C"]),
        ]);

        // A's successors are {B, C}: t1 shows both (fixed order), t2/t3 one
        let choice = patterns
            .iter()
            .find(|p| matches!(p, Pattern::Choice { predecessor, .. } if predecessor == "A"))
            .expect("choice pattern for A");
        assert!(choice.is_low_confidence());
        assert!(!patterns.iter().any(|p| matches!(p, Pattern::Parallel { .. })));
    }

    #[test]
    fn test_loop_detection() {
        let (graph, patterns) = mine_patterns(&[("t1", &["A", "B", "A", "B", "C"])]);

        let loops: Vec<_> = patterns
            .iter()
            .filter(|p| matches!(p, Pattern::Loop { .. }))
            .collect();
        assert_eq!(loops.len(), 1);
        match loops[0] {
            Pattern::Loop { body } => {
                assert_eq!(body, &vec!["A".to_string(), "B".to_string()]);
            }
            _ => unreachable!(),
        }

        let back = graph.edge("B", "A").expect("back edge in graph");
        assert!(back.is_back_edge);
        let forward = graph.edge("A", "B").expect("forward edge");
        assert!(!forward.is_back_edge);

        // the loop-back edge is excluded from forward classification
        assert!(patterns.contains(&Pattern::Sequence {
            source: "A".to_string(),
            target: "B".to_string(),
        }));
        assert!(patterns.contains(&Pattern::Sequence {
            source: "B".to_string(),
            target: "C".to_string(),
        }));
    }

    #[test]
    fn test_self_loop() {
        let (graph, patterns) = mine_patterns(&[("t1", &["A", "A", "B"])]);

        assert!(patterns.contains(&Pattern::Loop {
            body: vec!["A".to_string()],
        }));
        assert!(graph.edge("A", "A").unwrap().is_back_edge);
        assert!(patterns.contains(&Pattern::Sequence {
            source: "A".to_string(),
            target: "B".to_string(),
        }));
    }

    #[test]
    fn test_loop_bodies_deduplicated() {
        let (_, patterns) = mine_patterns(&[
            ("t1", &["A", "B", "A", "B", "C"]),
            ("t2", &["A", "B", "A", "B", "C"]),
        ]);

        let loops = patterns
            .iter()
            .filter(|p| matches!(p, Pattern::Loop { .. }))
            .count();
        assert_eq!(loops, 1);
    }

    #[test]
    fn test_discovery_order() {
        let (_, patterns) = mine_patterns(&[
            ("t1", &["S", "A", "B", "A", "X"]),
            ("t2", &["S", "A", "Y"]),
            ("t3", &["S", "A", "X"]),
        ]);

        // loops come first, sequences last
        let kinds: Vec<&str> = patterns.iter().map(Pattern::kind).collect();
        let first_loop = kinds.iter().position(|k| *k == "loop");
        let last_loop = kinds.iter().rposition(|k| *k == "loop");
        let first_seq = kinds.iter().position(|k| *k == "sequence");
        if let (Some(l), Some(s)) = (last_loop, first_seq) {
            assert!(l < s);
        }
        assert_eq!(first_loop, Some(0));
    }

    #[test]
    fn test_empty_log() {
        let (graph, patterns) = mine_patterns(&[]);
        assert!(graph.is_empty());
        assert!(patterns.is_empty());
    }
}
