//! Stage metadata and the pipeline stage trait.
//!
//! Every stage of the mining pipeline (trace assembly, graph construction,
//! pattern discovery, quality evaluation, model emission) carries a
//! `StageMetadata` and implements `MiningStage`.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Metadata describing one mining pipeline stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageMetadata {
    /// Unique stage identifier (e.g., "mining/graph-construction").
    pub id: String,

    /// Human-readable description.
    pub description: String,

    /// Version of the stage implementation.
    pub version: u32,
}

impl StageMetadata {
    /// Create new stage metadata with the given id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            version: 1,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the version.
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Returns the stage name, i.e. the id without its "mining/" prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }
}

impl Default for StageMetadata {
    fn default() -> Self {
        Self::new("unnamed")
    }
}

/// Base trait for all mining pipeline stages.
///
/// Provides access to stage metadata and pre-run validation.
pub trait MiningStage: Send + Sync + Debug {
    /// Returns the stage metadata.
    fn metadata(&self) -> &StageMetadata;

    /// Returns the stage id.
    fn id(&self) -> &str {
        &self.metadata().id
    }

    /// Validate stage configuration.
    ///
    /// Called before the stage runs to ensure configuration is valid.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct DummyStage {
        metadata: StageMetadata,
    }

    impl MiningStage for DummyStage {
        fn metadata(&self) -> &StageMetadata {
            &self.metadata
        }
    }

    #[test]
    fn test_stage_metadata_builder() {
        let meta = StageMetadata::new("mining/graph-construction")
            .with_description("Process graph construction")
            .with_version(2);

        assert_eq!(meta.id, "mining/graph-construction");
        assert_eq!(meta.description, "Process graph construction");
        assert_eq!(meta.version, 2);
        assert_eq!(meta.name(), "graph-construction");
    }

    #[test]
    fn test_stage_trait_defaults() {
        let stage = DummyStage {
            metadata: StageMetadata::new("mining/dummy"),
        };
        assert_eq!(stage.id(), "mining/dummy");
        assert!(stage.validate().is_ok());
    }
}
