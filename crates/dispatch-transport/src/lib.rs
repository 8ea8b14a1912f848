//! Dispatch Transport Layer
//!
//! This crate provides the message-framed duplex connections that carry
//! STOMP frames:
//! - WebSocket (primary, client and server side)
//! - Memory (in-process pairs, for tests and embedding)

pub mod error;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "memory")]
pub mod memory;

pub use error::{Result, TransportError};
pub use traits::{
    Accepted, BoxedReceiver, BoxedSender, Connector, TransportEvent, TransportReceiver,
    TransportSender, TransportServer,
};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketServer, WebSocketTransport};

#[cfg(feature = "memory")]
pub use memory::{memory_pair, LinkStats, MemoryConnector, MemoryListener, MemoryPeer};
