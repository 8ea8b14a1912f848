//! STOMP link
//!
//! A [`StompLink`] is one transport connection that has completed the
//! CONNECT/CONNECTED handshake. It turns transport messages into frames,
//! tracks traffic in both directions for heart-beating, and is owned by
//! exactly one session at a time.

use std::time::Duration;

use bytes::Bytes;
use dispatch_core::{Command, Frame, FrameReader, Heartbeat, Inbound};
use dispatch_transport::{BoxedReceiver, BoxedSender, Connector, TransportError, TransportEvent};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::SessionError;

/// What the server told us in CONNECTED
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Handshake {
    pub session_id: Option<String>,
    pub server: Option<String>,
    pub user_name: Option<String>,
    /// Negotiated intervals, from the client's point of view
    pub heartbeat: Heartbeat,
}

/// One read from the link
#[derive(Debug)]
pub enum LinkEvent {
    Frame(Frame),
    /// The transport went away; no further frames will arrive
    Closed(Option<String>),
    /// Bytes that could not be parsed as a frame; they were discarded
    Invalid(dispatch_core::Error),
}

pub struct StompLink {
    sender: BoxedSender,
    receiver: BoxedReceiver,
    reader: FrameReader,
    heartbeat: Heartbeat,
    last_received: Instant,
    last_sent: Instant,
}

impl StompLink {
    /// Connect the transport and complete the handshake within `timeout`.
    /// A link that does not make it to CONNECTED is closed before returning.
    pub async fn open(
        connector: &dyn Connector,
        url: &str,
        host: &str,
        offer: Heartbeat,
        timeout: Duration,
    ) -> Result<(Self, Handshake), SessionError> {
        let deadline = Instant::now() + timeout;

        let connected = tokio::time::timeout_at(deadline, connector.connect(url)).await;
        let (sender, receiver) = match connected {
            Ok(result) => result.map_err(|e| SessionError::TransportClosed(Some(e.to_string())))?,
            Err(_) => return Err(timed_out(timeout)),
        };

        let now = Instant::now();
        let mut link = Self {
            sender,
            receiver,
            reader: FrameReader::new(),
            heartbeat: Heartbeat::DISABLED,
            last_received: now,
            last_sent: now,
        };

        let result = tokio::time::timeout_at(deadline, link.handshake(host, offer)).await;
        match result {
            Ok(Ok(handshake)) => Ok((link, handshake)),
            Ok(Err(e)) => {
                link.close(false).await;
                Err(e)
            }
            Err(_) => {
                link.close(false).await;
                Err(timed_out(timeout))
            }
        }
    }

    async fn handshake(&mut self, host: &str, offer: Heartbeat) -> Result<Handshake, SessionError> {
        self.send(&Frame::connect(host, offer))
            .await
            .map_err(|e| SessionError::TransportClosed(Some(e.to_string())))?;

        loop {
            match self.next().await {
                LinkEvent::Frame(frame) if frame.command == Command::Connected => {
                    let server = match frame.header("heart-beat") {
                        Some(raw) => raw
                            .parse::<Heartbeat>()
                            .map_err(|e| SessionError::HandshakeFailed(e.to_string()))?,
                        None => Heartbeat::DISABLED,
                    };
                    self.heartbeat = Heartbeat::negotiate(offer, server);

                    let handshake = Handshake {
                        session_id: frame.header("session").map(str::to_string),
                        server: frame.header("server").map(str::to_string),
                        user_name: frame.header("user-name").map(str::to_string),
                        heartbeat: self.heartbeat,
                    };
                    info!(
                        "STOMP session established (session={:?}, heart-beat={})",
                        handshake.session_id, self.heartbeat
                    );
                    return Ok(handshake);
                }
                LinkEvent::Frame(frame) if frame.command == Command::Error => {
                    let reason = error_reason(&frame);
                    warn!("Handshake rejected: {}", reason);
                    return Err(SessionError::HandshakeFailed(reason));
                }
                LinkEvent::Frame(frame) => {
                    debug!("Ignoring {} before CONNECTED", frame.command);
                }
                LinkEvent::Closed(reason) => return Err(SessionError::TransportClosed(reason)),
                LinkEvent::Invalid(e) => return Err(SessionError::HandshakeFailed(e.to_string())),
            }
        }
    }

    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        trace!("-> {}", frame.command);
        self.sender.send(frame.encode()).await?;
        self.last_sent = Instant::now();
        Ok(())
    }

    pub async fn send_heartbeat(&mut self) -> Result<(), TransportError> {
        self.sender.send(Bytes::from_static(b"\n")).await?;
        self.last_sent = Instant::now();
        Ok(())
    }

    /// Next frame off the wire. Heart-beats only refresh the receive clock.
    ///
    /// Cancel-safe: partial input stays buffered in the reader.
    pub async fn next(&mut self) -> LinkEvent {
        loop {
            match self.reader.next() {
                Ok(Some(Inbound::Frame(frame))) => {
                    trace!("<- {}", frame.command);
                    return LinkEvent::Frame(frame);
                }
                Ok(Some(Inbound::Heartbeat)) => continue,
                Ok(None) => {}
                Err(e) => {
                    self.reader = FrameReader::new();
                    return LinkEvent::Invalid(e);
                }
            }

            match self.receiver.recv().await {
                Some(TransportEvent::Data(data)) => {
                    self.last_received = Instant::now();
                    self.reader.push(&data);
                }
                Some(TransportEvent::Connected) => {}
                Some(TransportEvent::Error(e)) => warn!("Transport error: {}", e),
                Some(TransportEvent::Disconnected { reason }) => return LinkEvent::Closed(reason),
                None => return LinkEvent::Closed(Some("transport ended".to_string())),
            }
        }
    }

    /// Time since anything arrived
    pub fn silent_for(&self) -> Duration {
        self.last_received.elapsed()
    }

    /// Time since anything was sent
    pub fn idle_for(&self) -> Duration {
        self.last_sent.elapsed()
    }

    /// Close the transport, saying DISCONNECT first when `graceful`
    pub async fn close(&mut self, graceful: bool) {
        if graceful && self.sender.is_connected() {
            if let Err(e) = self.send(&Frame::disconnect()).await {
                debug!("DISCONNECT not sent: {}", e);
            }
        }
        if let Err(e) = self.sender.close().await {
            debug!("Close failed: {}", e);
        }
    }
}

fn timed_out(timeout: Duration) -> SessionError {
    warn!("Handshake timed out after {:?}", timeout);
    SessionError::HandshakeFailed("handshake timed out".to_string())
}

/// Human-readable reason from an ERROR frame
pub(crate) fn error_reason(frame: &Frame) -> String {
    if let Some(message) = frame.header("message") {
        return message.to_string();
    }
    match frame.body_str() {
        Ok(body) if !body.trim().is_empty() => body.trim().to_string(),
        _ => "broker sent ERROR".to_string(),
    }
}
