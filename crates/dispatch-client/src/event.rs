//! Events delivered to handlers and observers

use std::time::Duration;

use dispatch_core::{AdmitRequestRecord, EventRecord, GeoPoint, IncidentRecord, Notification, TopicId};

use crate::decode::PayloadKind;
use crate::error::SessionError;
use crate::state::SessionState;

/// A decoded inbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    EventUpdate(EventRecord),
    LiveLocationUpdate(GeoPoint),
    Notification(Notification),
    ActiveIncidentList(Vec<IncidentRecord>),
    AdmitRequest(AdmitRequestRecord),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::EventUpdate(_) => PayloadKind::EventUpdate,
            Payload::LiveLocationUpdate(_) => PayloadKind::LiveLocationUpdate,
            Payload::Notification(_) => PayloadKind::Notification,
            Payload::ActiveIncidentList(_) => PayloadKind::ActiveIncidentList,
            Payload::AdmitRequest(_) => PayloadKind::AdmitRequest,
        }
    }
}

/// A payload plus the subscription it arrived on
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationEvent {
    pub topic_id: TopicId,
    pub destination: String,
    pub payload: Payload,
}

/// Session-level signals for observers (UI, CLI, logs)
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StateChanged(SessionState),
    /// Handshake completed and subscriptions were replayed
    Connected { session_id: Option<String> },
    /// The link went away without a protocol error
    Disconnected { reason: Option<String> },
    Error(SessionError),
    ReconnectScheduled { delay: Duration },
    /// A frame body failed to decode and was dropped
    DecodeFailed {
        topic_id: TopicId,
        destination: String,
        reason: String,
    },
    /// A handler panicked; the session carried on
    HandlerPanicked { topic_id: TopicId },
    /// A MESSAGE matched no subscription
    Unrouted { destination: Option<String> },
}
