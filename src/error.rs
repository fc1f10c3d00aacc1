// error.rs
// Description: Error type shared by the engine. Shape violations, missing tokens, malformed
//              blobs and missing forward caches all surface as LlmError, the binary decides
//              whether to halt.
// History:
// - 2026-10-18: Replace string error codes with a typed error enum.

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur while building, running or persisting the model.
#[derive(Error, Debug)]
pub enum LlmError {
    /// Two operands have incompatible shapes.
    #[error("dimension mismatch in {op}: {detail}")]
    DimensionMismatch { op: &'static str, detail: String },

    /// A token required by the tokenizer or the training driver is absent.
    #[error("required token missing from vocabulary: {0:?}")]
    MissingToken(String),

    /// A persisted blob could not be decoded or is internally inconsistent.
    #[error("malformed persisted state: {0}")]
    MalformedState(String),

    /// Backward was called on a component that has never run forward.
    #[error("backward called before forward on {0}")]
    MissingForwardCache(&'static str),

    /// A construction argument is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Builds a [`LlmError::DimensionMismatch`] from two matrix shapes.
    pub fn shapes(op: &'static str, t_lhs: (usize, usize), t_rhs: (usize, usize)) -> Self {
        LlmError::DimensionMismatch {
            op,
            detail: format!("{}x{} vs {}x{}", t_lhs.0, t_lhs.1, t_rhs.0, t_rhs.1),
        }
    }

    /// Builds a [`LlmError::DimensionMismatch`] with a free form detail.
    pub fn dims(op: &'static str, detail: impl Into<String>) -> Self {
        LlmError::DimensionMismatch {
            op,
            detail: detail.into(),
        }
    }
}
