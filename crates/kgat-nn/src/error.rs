//! Error types for kgat-nn.

use thiserror::Error;

/// kgat-nn error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Invalid configuration: unknown aggregator, malformed dimension list,
    /// dropout out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A supplied tensor disagrees with the configured shape.
    #[error("shape mismatch for {name}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Corrupt checkpoint or missing parameter.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Safetensors header / serialization error.
    #[error("safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    /// Graph or dataset error from kgat-core.
    #[error("graph error: {0}")]
    Graph(#[from] kgat_core::Error),

    /// Config file parse error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Training error.
    #[error("training error: {0}")]
    Training(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
