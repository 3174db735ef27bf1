//! # Spanmine Discovery
//!
//! Workflow discovery from execution spans.
//!
//! Reconstructs a structured workflow model from a closed batch of finished
//! execution spans and re-expresses it as a BPMN 2.0 diagram. The pipeline
//! runs left to right, single-threaded, with no state between invocations:
//!
//! 1. [`TraceAssembly`] - group raw spans into time-ordered traces
//! 2. [`GraphConstruction`] - build the annotated transition graph
//! 3. [`PatternDiscovery`] - classify sequence/parallel/choice/loop patterns
//! 4. [`QualityEvaluation`] - score completeness, precision, fitness, simplicity
//! 5. [`BpmnEmission`] - serialize BPMN XML and the JSON summary
//!
//! ## Example
//!
//! ```rust,ignore
//! use spanmine_discovery::{BpmnEmission, WorkflowMiner};
//!
//! let workflow = WorkflowMiner::mine(&spans)?;
//! let xml = BpmnEmission::emit_default(&workflow)?;
//! let summary = BpmnEmission::summary(&workflow)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assemble;
pub mod bpmn;
pub mod graph;
pub mod miner;
pub mod patterns;
pub mod quality;
pub mod types;

pub use assemble::{AssemblyResult, TraceAssembly};
pub use bpmn::{BpmnConfig, BpmnEmission, EndEventPolicy, BPMN_NS};
pub use graph::{sanitize_id, GraphConstruction};
pub use miner::WorkflowMiner;
pub use patterns::PatternDiscovery;
pub use quality::QualityEvaluation;
pub use types::{
    DiscoveredWorkflow, GraphStats, Pattern, ProcessEdge, ProcessGraph, ProcessNode,
    QualityMetrics, SpanRecord, SpanStatus, Trace, TraceLog,
};
