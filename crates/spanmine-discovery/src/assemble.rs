//! Trace assembly stage.
//!
//! Groups raw span records into per-trace, time-ordered sequences:
//! - Per-trace grouping by trace id
//! - Stable start-time ordering within each trace
//! - Malformed-span rejection with a non-fatal count

use crate::types::{SpanRecord, TraceLog};
use spanmine_core::{MiningStage, StageMetadata};

// ============================================================================
// Trace Assembly Stage
// ============================================================================

/// Result of assembling a span batch into traces.
#[derive(Debug, Clone)]
pub struct AssemblyResult {
    /// The assembled, time-ordered trace log.
    pub log: TraceLog,
    /// Number of spans skipped as malformed.
    pub rejected_spans: u64,
}

/// Trace assembly stage.
///
/// Consumes a closed batch of finished spans and produces the trace log the
/// rest of the pipeline operates on. Malformed spans (empty trace id, empty
/// task name, or an end time before the start time) are skipped and counted,
/// never fatal.
#[derive(Debug, Clone)]
pub struct TraceAssembly {
    metadata: StageMetadata,
}

impl Default for TraceAssembly {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceAssembly {
    /// Create a new trace assembly stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: StageMetadata::new("mining/trace-assembly")
                .with_description("Per-trace grouping and ordering of raw spans"),
        }
    }

    /// Assemble spans into a trace log.
    pub fn assemble(spans: &[SpanRecord]) -> AssemblyResult {
        let mut log = TraceLog::new();
        let mut rejected_spans = 0u64;

        for span in spans {
            if !Self::is_valid(span) {
                rejected_spans += 1;
                tracing::debug!(
                    trace_id = %span.trace_id,
                    task_name = %span.task_name,
                    "skipping malformed span"
                );
                continue;
            }
            log.push_span(span.clone());
        }

        // Start-time ordering; sort_by_key is stable, so equal timestamps
        // keep their arrival order.
        for trace in log.traces.values_mut() {
            trace.sort_by_start_time();
        }

        if rejected_spans > 0 {
            tracing::warn!(rejected_spans, "rejected malformed spans during assembly");
        }

        AssemblyResult {
            log,
            rejected_spans,
        }
    }

    fn is_valid(span: &SpanRecord) -> bool {
        !span.trace_id.is_empty()
            && !span.task_name.is_empty()
            && span.end_time >= span.start_time
    }
}

impl MiningStage for TraceAssembly {
    fn metadata(&self) -> &StageMetadata {
        &self.metadata
    }
}
