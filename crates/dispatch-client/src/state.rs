//! Session state as observed by client handles

use std::fmt;

use dispatch_core::Heartbeat;

use crate::error::SessionError;

/// Lifecycle state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Handshake or protocol failure; a reconnect is scheduled
    Failed,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// A connect attempt is running or has succeeded
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot published by the session task on every change
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionStatus {
    pub state: SessionState,
    pub last_error: Option<SessionError>,
    /// Server-assigned session id from CONNECTED
    pub session_id: Option<String>,
    /// Server product string from CONNECTED
    pub server: Option<String>,
    /// Authenticated principal from CONNECTED
    pub user_name: Option<String>,
    /// Heart-beat intervals in effect for the current link
    pub heartbeat: Heartbeat,
    pub reconnect_pending: bool,
}
