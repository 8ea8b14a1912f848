//! Dispatch Client Library
//!
//! Async client for the dispatch platform's realtime channels. One
//! [`DispatchClient`] owns one STOMP session: it performs the handshake,
//! keeps heart-beats flowing, replays subscriptions after every reconnect and
//! routes inbound messages to typed handlers.
//!
//! # Example
//!
//! ```ignore
//! use dispatch_client::{DispatchClient, Payload};
//!
//! #[tokio::main]
//! async fn main() -> dispatch_client::Result<()> {
//!     let client = DispatchClient::builder("wss://api.example.com/chat")
//!         .token("<jwt>")
//!         .connect()
//!         .await?;
//!
//!     client
//!         .join_event("42", "1912177586428452864", |event| {
//!             if let Payload::EventUpdate(record) = &event.payload {
//!                 println!("event {} is {}", record.id, record.status);
//!             }
//!         })
//!         .await?;
//!
//!     client.send_location("42", 31.52, 74.35).await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod event;
pub mod link;
pub mod publisher;
pub mod registry;
pub mod router;
mod session;
pub mod state;

pub use builder::DispatchClientBuilder;
pub use client::DispatchClient;
pub use config::{ClientConfig, SubscriptionRetention};
pub use decode::{Decoder, PayloadKind};
pub use error::{ClientError, Result, SessionError};
pub use event::{ApplicationEvent, ClientEvent, Payload};
pub use publisher::OutboundMessage;
pub use registry::{Handler, Scope, Subscription, SubscriptionRegistry};
pub use state::{SessionState, SessionStatus};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::DispatchClientBuilder;
    pub use crate::client::DispatchClient;
    pub use crate::error::{ClientError, Result};
    pub use crate::event::{ApplicationEvent, ClientEvent, Payload};
    pub use crate::state::SessionState;
    pub use dispatch_core::{Destination, EventRecord, GeoPoint, TopicId};
}
