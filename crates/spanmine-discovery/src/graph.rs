//! Process graph construction stage.
//!
//! Builds the frequency- and duration-annotated transition graph from an
//! assembled trace log:
//! - Node occurrence and duration accumulation
//! - Direct-succession edge extraction
//! - Start/end task identification
//! - Sanitized, collision-free node ids

use crate::types::{ProcessEdge, ProcessGraph, ProcessNode, SpanStatus, TraceLog};
use spanmine_core::{MiningError, MiningStage, Result, StageMetadata};
use std::collections::{BTreeMap, HashSet};

// ============================================================================
// Id Sanitization
// ============================================================================

/// Sanitize a task name into an XML-safe identifier.
///
/// Non-alphanumeric characters collapse into single underscores, the result
/// is lowercased, and a `t_` prefix is applied when the name does not start
/// with an ASCII letter. Uniqueness is handled separately by [`IdAllocator`].
pub fn sanitize_id(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            prev_underscore = false;
        } else if !prev_underscore && !out.is_empty() {
            out.push('_');
            prev_underscore = true;
        }
    }
    let trimmed = out.trim_end_matches('_');
    if trimmed.is_empty() {
        return "t".to_string();
    }
    if trimmed.starts_with(|c: char| c.is_ascii_alphabetic()) {
        trimmed.to_string()
    } else {
        format!("t_{trimmed}")
    }
}

/// Hands out unique element ids, disambiguating collisions with a
/// deterministic numeric suffix.
#[derive(Debug, Default)]
pub struct IdAllocator {
    used: HashSet<String>,
}

/// Upper bound on suffix disambiguation attempts per base id.
const MAX_ID_SUFFIX: u64 = 1_000_000;

impl IdAllocator {
    /// Create an empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `base` if free, otherwise the first free `base_N` with
    /// `N >= 2`. Exhausting the suffix space is a fatal error.
    pub fn allocate(&mut self, base: &str) -> Result<String> {
        if self.used.insert(base.to_string()) {
            return Ok(base.to_string());
        }
        for n in 2..MAX_ID_SUFFIX {
            let candidate = format!("{base}_{n}");
            if self.used.insert(candidate.clone()) {
                return Ok(candidate);
            }
        }
        Err(MiningError::IdCollision {
            id: base.to_string(),
        })
    }
}

// ============================================================================
// Graph Construction Stage
// ============================================================================

#[derive(Default)]
struct NodeAccum {
    occurrences: u64,
    total_duration_ms: i64,
    error_count: u64,
    is_start: bool,
    is_end: bool,
}

#[derive(Default)]
struct EdgeAccum {
    frequency: u64,
    total_gap_ms: i64,
}

/// Process graph construction stage.
///
/// Consumes the assembled trace log and produces the directed transition
/// graph. Edges are created strictly from observed direct successions;
/// nothing is inferred transitively.
#[derive(Debug, Clone)]
pub struct GraphConstruction {
    metadata: StageMetadata,
}

impl Default for GraphConstruction {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphConstruction {
    /// Create a new graph construction stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: StageMetadata::new("mining/graph-construction")
                .with_description("Directed transition graph construction"),
        }
    }

    /// Build the process graph from a trace log.
    pub fn build(log: &TraceLog) -> Result<ProcessGraph> {
        let mut node_stats: BTreeMap<String, NodeAccum> = BTreeMap::new();
        let mut edge_stats: BTreeMap<(String, String), EdgeAccum> = BTreeMap::new();

        for trace in log.traces.values() {
            let spans = &trace.spans;
            if spans.is_empty() {
                continue;
            }

            for span in spans {
                let entry = node_stats.entry(span.task_name.clone()).or_default();
                entry.occurrences += 1;
                entry.total_duration_ms += span.duration_ms();
                if span.status == SpanStatus::Error {
                    entry.error_count += 1;
                }
            }

            if let Some(first) = spans.first() {
                node_stats
                    .entry(first.task_name.clone())
                    .or_default()
                    .is_start = true;
            }
            if let Some(last) = spans.last() {
                node_stats.entry(last.task_name.clone()).or_default().is_end = true;
            }

            for window in spans.windows(2) {
                let gap = (window[1].start_time - window[0].end_time)
                    .num_milliseconds()
                    .max(0);
                let key = (window[0].task_name.clone(), window[1].task_name.clone());
                let entry = edge_stats.entry(key).or_default();
                entry.frequency += 1;
                entry.total_gap_ms += gap;
            }
        }

        let mut ids = IdAllocator::new();
        let mut nodes = Vec::with_capacity(node_stats.len());
        for (name, accum) in &node_stats {
            let id = ids.allocate(&sanitize_id(name))?;
            let average = if accum.occurrences > 0 {
                accum.total_duration_ms as f64 / accum.occurrences as f64
            } else {
                0.0
            };
            nodes.push(ProcessNode {
                name: name.clone(),
                id,
                occurrence_count: accum.occurrences,
                total_duration_ms: accum.total_duration_ms,
                average_duration_ms: average,
                error_count: accum.error_count,
                is_start: accum.is_start,
                is_end: accum.is_end,
            });
        }

        let edges = edge_stats
            .into_iter()
            .map(|((source, target), accum)| ProcessEdge {
                source,
                target,
                frequency: accum.frequency,
                average_duration_ms: if accum.frequency > 0 {
                    accum.total_gap_ms as f64 / accum.frequency as f64
                } else {
                    0.0
                },
                is_back_edge: false,
            })
            .collect();

        let start_nodes = nodes
            .iter()
            .filter(|n| n.is_start)
            .map(|n| n.name.clone())
            .collect();
        let end_nodes = nodes
            .iter()
            .filter(|n| n.is_end)
            .map(|n| n.name.clone())
            .collect();

        tracing::debug!(
            nodes = node_stats.len(),
            traces = log.trace_count(),
            "constructed process graph"
        );

        Ok(ProcessGraph {
            nodes,
            edges,
            start_nodes,
            end_nodes,
        })
    }
}

impl MiningStage for GraphConstruction {
    fn metadata(&self) -> &StageMetadata {
        &self.metadata
    }
}
