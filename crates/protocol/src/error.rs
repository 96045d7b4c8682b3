//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all codec failure modes.
///
/// Every variant is recoverable: a session that receives a frame it cannot
/// decode drops that frame and keeps serving.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The payload is not valid JSON or does not match the expected shape.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The payload decoded but carries neither `input` nor `resize`.
    #[error("message carries no input and no resize request")]
    EmptyMessage,

    /// A resize request with a zero dimension.
    #[error("invalid terminal size: {cols}x{rows}")]
    InvalidResize {
        /// Requested columns.
        cols: u16,
        /// Requested rows.
        rows: u16,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Deserialization(err.to_string())
    }
}
