//! Quality evaluation stage.
//!
//! Scores the discovered model against the original traces:
//! - Completeness: replayable fraction of distinct trace variants
//! - Fitness: frequency-weighted fraction of observed successions in the model
//! - Precision: behavior the model permits beyond what was observed
//! - Simplicity: decreasing function of model size

use crate::types::{Pattern, ProcessGraph, QualityMetrics, TraceLog};
use spanmine_core::{MiningStage, StageMetadata};
use std::collections::BTreeSet;

// ============================================================================
// Quality Evaluation Stage
// ============================================================================

/// Quality evaluation stage.
///
/// All four scores are defined over the same graph + pattern artifact the
/// emitter consumes, so callers can judge result trustworthiness before
/// exporting anything.
#[derive(Debug, Clone)]
pub struct QualityEvaluation {
    metadata: StageMetadata,
}

impl Default for QualityEvaluation {
    fn default() -> Self {
        Self::new()
    }
}

/// Divisor normalizing model size in the simplicity score; keeps typical
/// small workflows (up to ~15 nodes) above 0.7.
const COMPLEXITY_SCALE: f64 = 100.0;

impl QualityEvaluation {
    /// Create a new quality evaluation stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: StageMetadata::new("mining/quality-evaluation")
                .with_description("Completeness/precision/fitness/simplicity scoring"),
        }
    }

    /// Evaluate the discovered model against the trace log.
    pub fn evaluate(
        graph: &ProcessGraph,
        patterns: &[Pattern],
        log: &TraceLog,
    ) -> QualityMetrics {
        if log.is_empty() || graph.is_empty() {
            return QualityMetrics::zero();
        }

        QualityMetrics {
            completeness: Self::completeness(graph, log),
            precision: Self::precision(patterns, log),
            fitness: Self::fitness(graph, log),
            simplicity: Self::simplicity(graph, patterns),
        }
    }

    /// Fraction of distinct trace variants fully replayable by following
    /// only discovered edges.
    fn completeness(graph: &ProcessGraph, log: &TraceLog) -> f64 {
        let variants = log.variants();
        if variants.is_empty() {
            return 0.0;
        }

        let replayable = variants
            .keys()
            .filter(|variant| Self::replays(graph, variant))
            .count();
        replayable as f64 / variants.len() as f64
    }

    fn replays(graph: &ProcessGraph, variant: &[String]) -> bool {
        if variant.is_empty() {
            return false;
        }
        if variant.len() == 1 {
            return graph.node(&variant[0]).is_some();
        }
        variant
            .windows(2)
            .all(|pair| graph.edge(&pair[0], &pair[1]).is_some())
    }

    /// Frequency-weighted fraction of observed direct successions present in
    /// the model.
    fn fitness(graph: &ProcessGraph, log: &TraceLog) -> f64 {
        let mut observed = 0u64;
        let mut present = 0u64;

        for trace in log.traces.values() {
            for pair in trace.spans.windows(2) {
                observed += 1;
                if graph.edge(&pair[0].task_name, &pair[1].task_name).is_some() {
                    present += 1;
                }
            }
        }

        if observed == 0 {
            // only single-span traces; nothing the model could miss
            return 1.0;
        }
        present as f64 / observed as f64
    }

    /// `1 - extra / permitted`, where `extra` counts the parallel
    /// interleavings the model admits without having observed them.
    ///
    /// A model with only sequence and choice patterns permits exactly the
    /// observed orderings and scores 1.0; every parallel pattern widens the
    /// permitted set by the unobserved permutations of its branch set. The
    /// loss of precision is the documented cost of asserting concurrency.
    fn precision(patterns: &[Pattern], log: &TraceLog) -> f64 {
        let observed_variants = log.variants().len() as u64;
        if observed_variants == 0 {
            return 0.0;
        }

        let mut extra = 0u64;
        for pattern in patterns {
            if let Pattern::Parallel { branches, .. } = pattern {
                let permitted = factorial(branches.len());
                let observed = Self::observed_orderings(branches, log).max(1);
                extra = extra.saturating_add(permitted.saturating_sub(observed));
            }
        }

        let permitted_total = observed_variants.saturating_add(extra);
        if permitted_total == 0 {
            return 0.0;
        }
        (1.0 - extra as f64 / permitted_total as f64).max(0.0)
    }

    /// Distinct first-occurrence orderings of a full branch set across the
    /// traces where every branch occurs.
    fn observed_orderings(branches: &[String], log: &TraceLog) -> u64 {
        let mut orderings: BTreeSet<Vec<&str>> = BTreeSet::new();
        for trace in log.traces.values() {
            let mut positioned: Vec<(usize, &str)> = Vec::with_capacity(branches.len());
            let mut all_present = true;
            for branch in branches {
                match trace.first_index_of(branch) {
                    Some(pos) => positioned.push((pos, branch.as_str())),
                    None => {
                        all_present = false;
                        break;
                    }
                }
            }
            if all_present {
                positioned.sort_unstable();
                orderings.insert(positioned.into_iter().map(|(_, b)| b).collect());
            }
        }
        orderings.len() as u64
    }

    /// `1 / (1 + (nodes + edges + gateways) / scale)`.
    fn simplicity(graph: &ProcessGraph, patterns: &[Pattern]) -> f64 {
        let gateway_count = patterns
            .iter()
            .filter(|p| matches!(p, Pattern::Choice { .. } | Pattern::Parallel { .. }))
            .count()
            * 2;
        let size = graph.nodes.len() + graph.edges.len() + gateway_count;
        1.0 / (1.0 + size as f64 / COMPLEXITY_SCALE)
    }
}

impl MiningStage for QualityEvaluation {
    fn metadata(&self) -> &StageMetadata {
        &self.metadata
    }
}

fn factorial(n: usize) -> u64 {
    (2..=n as u64).fold(1u64, |acc, i| acc.saturating_mul(i))
}
