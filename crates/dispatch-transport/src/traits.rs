//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::error::Result;

/// Events that can occur on a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Connection closed (clean or error)
    Disconnected { reason: Option<String> },
    /// One transport message received
    Data(Bytes),
    /// Error occurred
    Error(String),
}

/// Trait for sending data
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send one transport message
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Trait for receiving data
#[async_trait]
pub trait TransportReceiver: Send {
    /// Receive the next event. `None` once the connection is gone.
    async fn recv(&mut self) -> Option<TransportEvent>;
}

pub type BoxedSender = Box<dyn TransportSender>;
pub type BoxedReceiver = Box<dyn TransportReceiver>;

/// Opens client connections. Object-safe so sessions can be handed any transport.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to a remote endpoint
    async fn connect(&self, url: &str) -> Result<(BoxedSender, BoxedReceiver)>;
}

/// A connection accepted by a [`TransportServer`]
pub struct Accepted<S, R> {
    pub sender: S,
    pub receiver: R,
    pub peer: SocketAddr,
    /// Request target (path and query) the client connected to
    pub target: String,
}

/// Trait for transport servers (listeners)
#[async_trait]
pub trait TransportServer: Send + Sync {
    /// The sender type for accepted connections
    type Sender: TransportSender;
    /// The receiver type for accepted connections
    type Receiver: TransportReceiver;

    /// Accept a new connection
    async fn accept(&mut self) -> Result<Accepted<Self::Sender, Self::Receiver>>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}
