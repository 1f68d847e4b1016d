use thiserror::Error;

/// Errors that can occur in kgat-core.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A data line could not be parsed.
    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
    /// Topology violates the node / relation id space.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
    /// Input that must be non-empty was empty.
    #[error("empty input: {0}")]
    Empty(String),
}

/// Result type alias for kgat-core.
pub type Result<T> = std::result::Result<T, Error>;
