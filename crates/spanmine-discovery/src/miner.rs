//! End-to-end mining pipeline.
//!
//! Runs trace assembly, graph construction, pattern discovery, and quality
//! evaluation as one synchronous pass over a closed span batch. Each
//! invocation is stateless; nothing is shared or cached between runs.

use crate::assemble::TraceAssembly;
use crate::graph::GraphConstruction;
use crate::patterns::PatternDiscovery;
use crate::quality::QualityEvaluation;
use crate::types::{DiscoveredWorkflow, SpanRecord};
use spanmine_core::{MiningStage, Result, StageMetadata};

// ============================================================================
// Workflow Miner
// ============================================================================

/// The complete discovery pipeline.
#[derive(Debug, Clone)]
pub struct WorkflowMiner {
    metadata: StageMetadata,
}

impl Default for WorkflowMiner {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowMiner {
    /// Create a new miner.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: StageMetadata::new("mining/pipeline")
                .with_description("Span batch to discovered workflow"),
        }
    }

    /// Mine a discovered workflow from a span batch.
    ///
    /// Malformed spans are skipped and counted on the result; an empty batch
    /// yields an empty workflow with zero metrics. The only fatal condition
    /// is exhaustion of the node id space, which no realistic input reaches.
    pub fn mine(spans: &[SpanRecord]) -> Result<DiscoveredWorkflow> {
        let assembly = TraceAssembly::assemble(spans);
        if assembly.log.is_empty() {
            tracing::info!(
                rejected_spans = assembly.rejected_spans,
                "no usable traces in span batch"
            );
            return Ok(DiscoveredWorkflow::empty(assembly.rejected_spans));
        }

        let graph = GraphConstruction::build(&assembly.log)?;
        let (graph, patterns) = PatternDiscovery::discover(graph, &assembly.log);
        let metrics = QualityEvaluation::evaluate(&graph, &patterns, &assembly.log);

        tracing::info!(
            traces = assembly.log.trace_count(),
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            patterns = patterns.len(),
            rejected_spans = assembly.rejected_spans,
            "workflow discovery complete"
        );

        Ok(DiscoveredWorkflow {
            graph,
            patterns,
            metrics,
            rejected_spans: assembly.rejected_spans,
        })
    }
}

impl MiningStage for WorkflowMiner {
    fn metadata(&self) -> &StageMetadata {
        &self.metadata
    }
}
