//! Error types for MIME operations.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Header name or value cannot be written to the wire.
    #[error("Invalid MIME header: {0}")]
    InvalidHeader(String),

    /// Missing required header.
    #[error("Missing required header: {0}")]
    MissingHeader(String),
}
