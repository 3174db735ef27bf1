//! Workflow discovery types and data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

// ============================================================================
// Span & Trace Types
// ============================================================================

/// Completion status of an execution span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    /// Span finished successfully.
    Ok,
    /// Span finished with an error.
    Error,
    /// Status was not reported.
    #[default]
    Unknown,
}

/// One finished unit of execution work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Identifier grouping spans belonging to one execution instance.
    pub trace_id: String,
    /// Activity name; used as the graph node key. Upstream producers may
    /// call this field `name` or `operation`.
    #[serde(alias = "name", alias = "operation")]
    pub task_name: String,
    /// Start timestamp.
    pub start_time: DateTime<Utc>,
    /// End timestamp.
    pub end_time: DateTime<Utc>,
    /// Completion status, used for annotation only.
    #[serde(default)]
    pub status: SpanStatus,
    /// Free-form attributes, passed through unchanged.
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl SpanRecord {
    /// Create a span with the given identity and time window.
    pub fn new(
        trace_id: impl Into<String>,
        task_name: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            task_name: task_name.into(),
            start_time,
            end_time,
            status: SpanStatus::Unknown,
            attributes: HashMap::new(),
        }
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = status;
        self
    }

    /// Duration of the span in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }
}

/// Ordered sequence of spans sharing one trace id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Trace id.
    pub trace_id: String,
    /// Spans in start-time order.
    pub spans: Vec<SpanRecord>,
}

impl Trace {
    /// Create an empty trace.
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            spans: Vec::new(),
        }
    }

    /// Get the task-name sequence.
    pub fn task_sequence(&self) -> Vec<&str> {
        self.spans.iter().map(|s| s.task_name.as_str()).collect()
    }

    /// True if the trace contains the given task.
    pub fn contains_task(&self, task: &str) -> bool {
        self.spans.iter().any(|s| s.task_name == task)
    }

    /// Index of the first span running the given task, if any.
    pub fn first_index_of(&self, task: &str) -> Option<usize> {
        self.spans.iter().position(|s| s.task_name == task)
    }

    /// Sort spans by start time, preserving arrival order on ties.
    pub fn sort_by_start_time(&mut self) {
        self.spans.sort_by_key(|s| s.start_time);
    }
}

/// All assembled traces of one mining run, keyed by trace id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceLog {
    /// Traces by trace id.
    pub traces: BTreeMap<String, Trace>,
}

impl TraceLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a span to its trace, creating the trace on first sight.
    pub fn push_span(&mut self, span: SpanRecord) {
        let trace = self
            .traces
            .entry(span.trace_id.clone())
            .or_insert_with(|| Trace::new(span.trace_id.clone()));
        trace.spans.push(span);
    }

    /// Number of traces.
    pub fn trace_count(&self) -> usize {
        self.traces.len()
    }

    /// Number of spans across all traces.
    pub fn span_count(&self) -> usize {
        self.traces.values().map(|t| t.spans.len()).sum()
    }

    /// True if the log holds no traces.
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// All distinct task names, sorted.
    pub fn task_names(&self) -> Vec<String> {
        let set: HashSet<&str> = self
            .traces
            .values()
            .flat_map(|t| t.spans.iter().map(|s| s.task_name.as_str()))
            .collect();
        let mut names: Vec<String> = set.into_iter().map(String::from).collect();
        names.sort();
        names
    }

    /// Distinct trace variants (unique task-name sequences) with the number
    /// of traces following each, in deterministic order.
    pub fn variants(&self) -> BTreeMap<Vec<String>, u64> {
        let mut variants: BTreeMap<Vec<String>, u64> = BTreeMap::new();
        for trace in self.traces.values() {
            let seq: Vec<String> = trace
                .spans
                .iter()
                .map(|s| s.task_name.clone())
                .collect();
            *variants.entry(seq).or_insert(0) += 1;
        }
        variants
    }
}

// ============================================================================
// Process Graph Types
// ============================================================================

/// One distinct task observed across all traces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessNode {
    /// Task name as observed in the spans.
    pub name: String,
    /// Sanitized identifier, unique within the graph and safe as an XML id.
    pub id: String,
    /// Number of times the task appears across all traces.
    pub occurrence_count: u64,
    /// Sum of span durations in milliseconds.
    pub total_duration_ms: i64,
    /// Average span duration in milliseconds.
    pub average_duration_ms: f64,
    /// Number of occurrences that reported an error status.
    pub error_count: u64,
    /// True if the task is ever the first element of a trace.
    pub is_start: bool,
    /// True if the task is ever the last element of a trace.
    pub is_end: bool,
}

/// Directed "target observed immediately after source" relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEdge {
    /// Source task name.
    pub source: String,
    /// Target task name.
    pub target: String,
    /// Number of observed direct successions.
    pub frequency: u64,
    /// Average gap between the source span end and the target span start,
    /// in milliseconds.
    pub average_duration_ms: f64,
    /// True if the edge closes a cycle (revisits an earlier task).
    pub is_back_edge: bool,
}

/// Aggregate statistics over a process graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    /// Number of nodes.
    pub node_count: usize,
    /// Number of edges.
    pub edge_count: usize,
    /// Edge count over the maximum possible edge count.
    pub density: f64,
    /// Average edge frequency.
    pub average_edge_frequency: f64,
    /// Number of start nodes.
    pub start_node_count: usize,
    /// Number of end nodes.
    pub end_node_count: usize,
}

/// Frequency- and duration-annotated directed graph of task transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessGraph {
    /// Nodes, sorted by task name.
    pub nodes: Vec<ProcessNode>,
    /// Edges, sorted by (source, target).
    pub edges: Vec<ProcessEdge>,
    /// Task names that start at least one trace, sorted.
    pub start_nodes: Vec<String>,
    /// Task names that end at least one trace, sorted.
    pub end_nodes: Vec<String>,
}

impl ProcessGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a node by task name.
    pub fn node(&self, name: &str) -> Option<&ProcessNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Look up an edge by endpoints.
    pub fn edge(&self, source: &str, target: &str) -> Option<&ProcessEdge> {
        self.edges
            .iter()
            .find(|e| e.source == source && e.target == target)
    }

    /// Outgoing edges of a task.
    pub fn outgoing(&self, source: &str) -> Vec<&ProcessEdge> {
        self.edges.iter().filter(|e| e.source == source).collect()
    }

    /// Incoming edges of a task.
    pub fn incoming(&self, target: &str) -> Vec<&ProcessEdge> {
        self.edges.iter().filter(|e| e.target == target).collect()
    }

    /// Targets of non-back-edge outgoing edges, sorted.
    pub fn forward_successors(&self, source: &str) -> Vec<&str> {
        let mut targets: Vec<&str> = self
            .edges
            .iter()
            .filter(|e| e.source == source && !e.is_back_edge)
            .map(|e| e.target.as_str())
            .collect();
        targets.sort_unstable();
        targets
    }

    /// True if the graph holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The unique node every branch converges to via a forward edge, if one
    /// exists. Targets inside the branch set itself do not count.
    pub fn common_successor(&self, branches: &[String]) -> Option<String> {
        let branch_set: HashSet<&str> = branches.iter().map(String::as_str).collect();
        let mut common: Option<BTreeSet<String>> = None;

        for branch in branches {
            let targets: BTreeSet<String> = self
                .forward_successors(branch)
                .into_iter()
                .filter(|t| !branch_set.contains(t))
                .map(String::from)
                .collect();
            common = Some(match common {
                None => targets,
                Some(prev) => prev.intersection(&targets).cloned().collect(),
            });
        }

        let common = common.unwrap_or_default();
        if common.len() == 1 {
            common.into_iter().next()
        } else {
            None
        }
    }

    /// Calculate aggregate graph statistics.
    pub fn stats(&self) -> GraphStats {
        let node_count = self.nodes.len();
        let edge_count = self.edges.len();

        let max_possible_edges = node_count * node_count;
        let density = if max_possible_edges > 0 {
            edge_count as f64 / max_possible_edges as f64
        } else {
            0.0
        };

        let total_frequency: u64 = self.edges.iter().map(|e| e.frequency).sum();
        let average_edge_frequency = if edge_count > 0 {
            total_frequency as f64 / edge_count as f64
        } else {
            0.0
        };

        GraphStats {
            node_count,
            edge_count,
            density,
            average_edge_frequency,
            start_node_count: self.start_nodes.len(),
            end_node_count: self.end_nodes.len(),
        }
    }
}

// ============================================================================
// Pattern Types
// ============================================================================

/// A classified local control-flow structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pattern {
    /// `target` follows `source` wherever `source` occurs, and `source`
    /// has no other forward edge.
    Sequence {
        /// Source task.
        source: String,
        /// Target task.
        target: String,
    },
    /// Branches that run concurrently after a common split point,
    /// observed in varying relative order across traces.
    Parallel {
        /// Common predecessor of the branches.
        split: String,
        /// Concurrent branch tasks, sorted.
        branches: Vec<String>,
        /// Node all branches converge to, when one exists.
        join: Option<String>,
    },
    /// Mutually exclusive branches after a common predecessor; at most one
    /// branch occurs within any single trace.
    Choice {
        /// Common predecessor of the branches.
        predecessor: String,
        /// Alternative branch tasks, sorted.
        branches: Vec<String>,
        /// True when the trace evidence was mixed and the classification
        /// fell back to the conservative reading.
        low_confidence: bool,
    },
    /// A task or short subpath observed to repeat within a trace.
    Loop {
        /// The repeating tasks in first-occurrence order.
        body: Vec<String>,
    },
}

impl Pattern {
    /// Short classification name.
    pub fn kind(&self) -> &'static str {
        match self {
            Pattern::Sequence { .. } => "sequence",
            Pattern::Parallel { .. } => "parallel",
            Pattern::Choice { .. } => "choice",
            Pattern::Loop { .. } => "loop",
        }
    }

    /// True for a `Choice` carrying the low-confidence marker.
    pub fn is_low_confidence(&self) -> bool {
        matches!(
            self,
            Pattern::Choice {
                low_confidence: true,
                ..
            }
        )
    }
}

// ============================================================================
// Quality & Result Types
// ============================================================================

/// Model quality scores, each in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Fraction of distinct trace variants the graph can replay.
    pub completeness: f64,
    /// Inverse measure of behavior the model permits beyond what was
    /// observed.
    pub precision: f64,
    /// Frequency-weighted fraction of observed successions present in the
    /// model.
    pub fitness: f64,
    /// Decreasing function of model size.
    pub simplicity: f64,
}

impl QualityMetrics {
    /// All-zero metrics, used for the empty workflow.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            completeness: 0.0,
            precision: 0.0,
            fitness: 0.0,
            simplicity: 0.0,
        }
    }

    /// Unweighted average of the four scores.
    pub fn overall(&self) -> f64 {
        (self.completeness + self.precision + self.fitness + self.simplicity) / 4.0
    }
}

/// The aggregate result of one mining invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredWorkflow {
    /// The annotated process graph.
    pub graph: ProcessGraph,
    /// Classified patterns in discovery order.
    pub patterns: Vec<Pattern>,
    /// Model quality scores.
    pub metrics: QualityMetrics,
    /// Number of input spans rejected during assembly.
    pub rejected_spans: u64,
}

impl DiscoveredWorkflow {
    /// An empty workflow carrying only the rejected-span count.
    #[must_use]
    pub fn empty(rejected_spans: u64) -> Self {
        Self {
            graph: ProcessGraph::new(),
            patterns: Vec::new(),
            metrics: QualityMetrics::zero(),
            rejected_spans,
        }
    }

    /// True if nothing was discovered.
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Patterns whose classification was ambiguous.
    pub fn low_confidence_patterns(&self) -> Vec<&Pattern> {
        self.patterns
            .iter()
            .filter(|p| p.is_low_confidence())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn test_span_duration() {
        let span = SpanRecord::new("t1", "fetch", ts(10), ts(12));
        assert_eq!(span.duration_ms(), 2000);
        assert_eq!(span.status, SpanStatus::Unknown);
    }

    #[test]
    fn test_span_field_aliases() {
        let json = r#"{
            "trace_id": "t1",
            "operation": "fetch",
            "start_time": "2026-08-01T10:00:00Z",
            "end_time": "2026-08-01T10:00:01Z"
        }"#;
        let span: SpanRecord = serde_json::from_str(json).unwrap();
        assert_eq!(span.task_name, "fetch");
        assert_eq!(span.status, SpanStatus::Unknown);
        assert!(span.attributes.is_empty());
    }

    #[test]
    fn test_trace_log_grouping() {
        let mut log = TraceLog::new();
        log.push_span(SpanRecord::new("t1", "a", ts(1), ts(2)));
        log.push_span(SpanRecord::new("t2", "a", ts(1), ts(2)));
        log.push_span(SpanRecord::new("t1", "b", ts(3), ts(4)));

        assert_eq!(log.trace_count(), 2);
        assert_eq!(log.span_count(), 3);
        assert_eq!(log.task_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_variants() {
        let mut log = TraceLog::new();
        for id in ["t1", "t2"] {
            log.push_span(SpanRecord::new(id, "a", ts(1), ts(2)));
            log.push_span(SpanRecord::new(id, "b", ts(3), ts(4)));
        }
        log.push_span(SpanRecord::new("t3", "a", ts(1), ts(2)));

        let variants = log.variants();
        assert_eq!(variants.len(), 2);
        assert_eq!(
            variants.get(&vec!["a".to_string(), "b".to_string()]),
            Some(&2)
        );
        assert_eq!(variants.get(&vec!["a".to_string()]), Some(&1));
    }

    #[test]
    fn test_graph_lookups() {
        let graph = ProcessGraph {
            nodes: vec![],
            edges: vec![
                ProcessEdge {
                    source: "a".to_string(),
                    target: "b".to_string(),
                    frequency: 2,
                    average_duration_ms: 5.0,
                    is_back_edge: false,
                },
                ProcessEdge {
                    source: "b".to_string(),
                    target: "a".to_string(),
                    frequency: 1,
                    average_duration_ms: 5.0,
                    is_back_edge: true,
                },
            ],
            start_nodes: vec!["a".to_string()],
            end_nodes: vec!["b".to_string()],
        };

        assert!(graph.edge("a", "b").is_some());
        assert!(graph.edge("b", "c").is_none());
        assert_eq!(graph.outgoing("a").len(), 1);
        assert_eq!(graph.incoming("a").len(), 1);
        // back edges are excluded from forward successors
        assert!(graph.forward_successors("b").is_empty());
        assert_eq!(graph.forward_successors("a"), vec!["b"]);
    }

    #[test]
    fn test_pattern_helpers() {
        let p = Pattern::Choice {
            predecessor: "a".to_string(),
            branches: vec!["b".to_string(), "c".to_string()],
            low_confidence: true,
        };
        assert_eq!(p.kind(), "choice");
        assert!(p.is_low_confidence());

        let s = Pattern::Sequence {
            source: "a".to_string(),
            target: "b".to_string(),
        };
        assert!(!s.is_low_confidence());
    }

    #[test]
    fn test_quality_overall() {
        let metrics = QualityMetrics {
            completeness: 1.0,
            precision: 1.0,
            fitness: 1.0,
            simplicity: 0.5,
        };
        assert!((metrics.overall() - 0.875).abs() < f64::EPSILON);
        assert_eq!(QualityMetrics::zero().overall(), 0.0);
    }

    #[test]
    fn test_workflow_json_roundtrip() {
        let workflow = DiscoveredWorkflow::empty(3);
        let json = serde_json::to_string(&workflow).unwrap();
        let back: DiscoveredWorkflow = serde_json::from_str(&json).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.rejected_spans, 3);
    }
}
