//! Error types for dispatch-core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Frame could not be parsed
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Command line is not a known STOMP command
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Header value could not be escaped or unescaped
    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    /// A required header was absent
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    /// Frame body exceeds the reader's limit
    #[error("frame too large: {0} bytes (max {1})")]
    FrameTooLarge(usize, usize),

    /// Invalid destination format
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    /// Latitude/longitude outside the valid range
    #[error("{field} must be between -{limit} and {limit}, got {value}")]
    InvalidCoordinate {
        field: &'static str,
        value: f64,
        limit: u16,
    },

    /// Payload body failed structured decode
    #[error("decode error: {0}")]
    Decode(String),

    /// Payload could not be serialized
    #[error("encode error: {0}")]
    Encode(String),
}

