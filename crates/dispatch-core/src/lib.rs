//! Dispatch Core
//!
//! Core types and encoding for the dispatch realtime client.
//!
//! This crate provides:
//! - STOMP 1.2 frames and a streaming frame reader ([`Frame`], [`FrameReader`])
//! - Heart-beat negotiation ([`Heartbeat`])
//! - Destination parsing and the platform's destination/topic-id scheme ([`Destination`], [`destination`])
//! - Typed payload records for inbound and outbound bodies ([`types`])

pub mod destination;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod types;

pub use destination::{Destination, TopicId};
pub use error::{Error, Result};
pub use frame::{Command, Frame, FrameReader, Inbound};
pub use heartbeat::Heartbeat;
pub use types::*;

/// STOMP protocol version spoken by the client
pub const STOMP_VERSION: &str = "1.2";

/// WebSocket subprotocol identifier for STOMP 1.2
pub const WS_SUBPROTOCOL: &str = "v12.stomp";

/// Default outgoing/incoming heart-beat interval in milliseconds
pub const DEFAULT_HEARTBEAT_MS: u64 = 4000;

/// Default delay before a scheduled reconnect, in milliseconds
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

/// Content type attached to every SEND frame
pub const JSON_CONTENT_TYPE: &str = "application/json";
