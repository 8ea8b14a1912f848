//! Client error types

use dispatch_core::TopicId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors returned to callers of [`DispatchClient`](crate::DispatchClient)
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("transport closed: {}", .0.as_deref().unwrap_or("no reason given"))]
    TransportClosed(Option<String>),

    /// A body did not decode into its subscription's payload type
    #[error("failed to decode payload on {topic_id}: {reason}")]
    Decode { topic_id: TopicId, reason: String },

    #[error("{field} must be between -{limit} and {limit}, got {value}")]
    InvalidCoordinate {
        field: &'static str,
        value: f64,
        limit: u16,
    },

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("unknown topic: {0}")]
    UnknownTopic(TopicId),

    #[error("no credential supplied")]
    NoCredential,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("session closed")]
    SessionClosed,

    #[error("timeout")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(dispatch_core::Error),

    /// A frame could not be written to the link
    #[error("transport error: {0}")]
    Transport(#[from] dispatch_transport::TransportError),
}

impl From<dispatch_core::Error> for ClientError {
    fn from(e: dispatch_core::Error) -> Self {
        match e {
            dispatch_core::Error::InvalidCoordinate {
                field,
                value,
                limit,
            } => ClientError::InvalidCoordinate {
                field,
                value,
                limit,
            },
            dispatch_core::Error::InvalidDestination(d) => ClientError::InvalidDestination(d),
            other => ClientError::Protocol(other),
        }
    }
}

/// Asynchronous session failures, reported through state and events
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The broker rejected or never completed the CONNECT handshake
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The broker sent an ERROR frame on an established session
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection dropped, was refused, or went silent
    #[error("transport closed: {}", .0.as_deref().unwrap_or("no reason given"))]
    TransportClosed(Option<String>),
}

impl SessionError {
    /// Errors that put the session into `Failed` and schedule a retry
    pub fn is_protocol_failure(&self) -> bool {
        matches!(self, SessionError::HandshakeFailed(_) | SessionError::Protocol(_))
    }
}

impl From<SessionError> for ClientError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::HandshakeFailed(reason) | SessionError::Protocol(reason) => {
                ClientError::HandshakeFailed(reason)
            }
            SessionError::TransportClosed(reason) => ClientError::TransportClosed(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_failures() {
        assert!(SessionError::HandshakeFailed("invalid token".into()).is_protocol_failure());
        assert!(SessionError::Protocol("server restarting".into()).is_protocol_failure());
        assert!(!SessionError::TransportClosed(None).is_protocol_failure());
    }

    #[test]
    fn test_transport_error_converts() {
        let err: ClientError = dispatch_transport::TransportError::NotConnected.into();
        assert!(matches!(err, ClientError::Transport(_)));
    }
}
