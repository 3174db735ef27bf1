//! Error types for spanmine.

use thiserror::Error;

/// Result type alias using `MiningError`.
pub type Result<T> = std::result::Result<T, MiningError>;

/// Errors that can occur during a mining run.
///
/// Malformed input spans and empty input are deliberately *not* errors:
/// they surface as a rejected-span count and an empty workflow on the
/// result itself. The variants here are the fatal conditions a caller
/// cannot work around.
#[derive(Debug, Error)]
pub enum MiningError {
    /// Element id disambiguation was exhausted for a sanitized name.
    #[error("Element id collision could not be resolved: {id}")]
    IdCollision {
        /// The sanitized id that could not be made unique.
        id: String,
    },

    /// An emitted sequence flow references an element id that does not
    /// exist in the same document.
    #[error("Dangling reference in emitted model: {reference}")]
    DanglingReference {
        /// The unresolved `sourceRef`/`targetRef` value.
        reference: String,
    },

    /// Serialization of a result artifact failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// XML emission failed.
    #[error("Emission error: {0}")]
    Emit(String),
}

impl MiningError {
    /// Create a serialization error.
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        MiningError::Serialization(msg.into())
    }

    /// Create an emission error.
    #[must_use]
    pub fn emit(msg: impl Into<String>) -> Self {
        MiningError::Emit(msg.into())
    }
}
