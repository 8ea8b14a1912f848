//! WebSocket transport implementation

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        handshake::server::{Request as HsRequest, Response as HsResponse},
        http::HeaderValue,
        protocol::{Message as WsMessage, WebSocketConfig as WsProtocolConfig},
    },
};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{
    Accepted, BoxedReceiver, BoxedSender, Connector, TransportEvent, TransportReceiver,
    TransportSender, TransportServer,
};

use dispatch_core::WS_SUBPROTOCOL;

const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Subprotocol to request/accept
    pub subprotocol: String,
    /// Maximum message size
    pub max_message_size: usize,
    /// Capacity of the send and event channels
    pub channel_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            subprotocol: WS_SUBPROTOCOL.to_string(),
            max_message_size: 1024 * 1024, // 1MB
            channel_capacity: 256,
        }
    }
}

impl WebSocketConfig {
    fn protocol_config(&self) -> WsProtocolConfig {
        let mut config = WsProtocolConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config
    }
}

/// WebSocket transport
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

/// WebSocket sender
pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
}

#[async_trait]
impl TransportSender for WebSocketSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        // STOMP frames travel as text; anything else goes out binary
        let msg = match String::from_utf8(data.to_vec()) {
            Ok(text) => WsMessage::Text(text),
            Err(e) => WsMessage::Binary(e.into_bytes()),
        };

        self.tx
            .send(msg)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        let _ = self.tx.send(WsMessage::Close(None)).await;
        *self.connected.lock() = false;
        Ok(())
    }
}

/// WebSocket receiver
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

#[async_trait]
impl Connector for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<(BoxedSender, BoxedReceiver)> {
        info!("Connecting to WebSocket: {}", redact_query(url));

        let parsed = url::Url::parse(url)?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        let mut request = parsed
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let protocol = HeaderValue::from_str(&self.config.subprotocol)
            .map_err(|e| TransportError::Other(e.to_string()))?;
        request.headers_mut().insert(SUBPROTOCOL_HEADER, protocol);

        let (ws_stream, response) =
            connect_async_with_config(request, Some(self.config.protocol_config()), true)
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket connected, response: {:?}", response.status());

        match response.headers().get(SUBPROTOCOL_HEADER) {
            Some(protocol) => debug!("Server subprotocol: {:?}", protocol),
            None => warn!("Server did not confirm subprotocol {}", self.config.subprotocol),
        }

        let (write, read) = ws_stream.split();
        let (sender, receiver) = spawn_io(write, read, self.config.channel_capacity);
        Ok((Box::new(sender), Box::new(receiver)))
    }
}

/// Spawn the writer and reader tasks for an upgraded stream
fn spawn_io<W, R>(write: W, read: R, capacity: usize) -> (WebSocketSender, WebSocketReceiver)
where
    W: futures_util::Sink<WsMessage> + Unpin + Send + 'static,
    W::Error: std::fmt::Display,
    R: Stream<Item = std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Unpin
        + Send
        + 'static,
{
    let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(capacity);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(capacity);

    let connected = Arc::new(Mutex::new(true));
    let connected_write = connected.clone();
    let connected_read = connected.clone();

    // Writer task. Ends when the sender is closed or dropped; either way the
    // peer gets a Close frame.
    tokio::spawn(async move {
        let mut write = write;
        let mut close_sent = false;
        while let Some(msg) = send_rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("WebSocket write error: {}", e);
                break;
            }
            if closing {
                close_sent = true;
                break;
            }
        }
        *connected_write.lock() = false;
        if !close_sent {
            debug!("WebSocket sender dropped, closing");
            let _ = write.send(WsMessage::Close(None)).await;
        }
        let _ = write.close().await;
    });

    // Reader task. Ends with the stream, or as soon as the receiver is
    // dropped so the read half is released.
    tokio::spawn(async move {
        let mut read = read;

        if event_tx.send(TransportEvent::Connected).await.is_err() {
            return;
        }

        loop {
            let next = tokio::select! {
                next = read.next() => next,
                _ = event_tx.closed() => {
                    debug!("WebSocket receiver dropped, releasing read half");
                    *connected_read.lock() = false;
                    return;
                }
            };

            let event = match next {
                Some(Ok(WsMessage::Text(text))) => TransportEvent::Data(Bytes::from(text)),
                Some(Ok(WsMessage::Binary(data))) => TransportEvent::Data(Bytes::from(data)),
                // Pong replies are handled by tungstenite
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => continue,
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string());
                    info!("WebSocket closed: {:?}", reason);
                    *connected_read.lock() = false;
                    let _ = event_tx.send(TransportEvent::Disconnected { reason }).await;
                    return;
                }
                Some(Err(e)) => {
                    error!("WebSocket read error: {}", e);
                    *connected_read.lock() = false;
                    let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                    let _ = event_tx
                        .send(TransportEvent::Disconnected {
                            reason: Some(e.to_string()),
                        })
                        .await;
                    return;
                }
                None => {
                    *connected_read.lock() = false;
                    let _ = event_tx
                        .send(TransportEvent::Disconnected {
                            reason: Some("stream ended".to_string()),
                        })
                        .await;
                    return;
                }
            };

            if event_tx.send(event).await.is_err() {
                *connected_read.lock() = false;
                return;
            }
        }
    });

    (
        WebSocketSender {
            tx: send_tx,
            connected,
        },
        WebSocketReceiver { rx: event_rx },
    )
}

/// Strip the query string so credentials never reach the logs
fn redact_query(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}

/// WebSocket server
pub struct WebSocketServer {
    listener: tokio::net::TcpListener,
    config: WebSocketConfig,
}

impl WebSocketServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("WebSocket server listening on {}", addr);

        Ok(Self {
            listener,
            config: WebSocketConfig::default(),
        })
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl TransportServer for WebSocketServer {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn accept(&mut self) -> Result<Accepted<Self::Sender, Self::Receiver>> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("Accepted TCP connection from {}", peer);

        let subprotocol = self.config.subprotocol.clone();
        let target = Arc::new(Mutex::new(String::new()));
        let target_seen = target.clone();

        let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            move |req: &HsRequest, mut response: HsResponse| {
                *target_seen.lock() = req.uri().to_string();

                // Client may request multiple protocols, comma-separated
                let requested = req
                    .headers()
                    .get(SUBPROTOCOL_HEADER)
                    .and_then(|p| p.to_str().ok())
                    .map(|p| p.split(',').any(|s| s.trim() == subprotocol))
                    .unwrap_or(false);
                if requested {
                    if let Ok(value) = HeaderValue::from_str(&subprotocol) {
                        response.headers_mut().insert(SUBPROTOCOL_HEADER, value);
                    }
                }
                Ok(response)
            },
            Some(self.config.protocol_config()),
        )
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("WebSocket client connected from {}", peer);

        let (write, read) = ws_stream.split();
        let (sender, receiver) = spawn_io(write, read, self.config.channel_capacity);
        let target = target.lock().clone();

        Ok(Accepted {
            sender,
            receiver,
            peer,
            target,
        })
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config() {
        let config = WebSocketConfig::default();
        assert_eq!(config.subprotocol, "v12.stomp");
    }

    #[test]
    fn test_redact_query() {
        assert_eq!(redact_query("ws://host/chat?token=abc"), "ws://host/chat");
        assert_eq!(redact_query("ws://host/chat"), "ws://host/chat");
    }

    #[tokio::test]
    async fn test_rejects_non_websocket_scheme() {
        let transport = WebSocketTransport::new();
        let result = transport.connect("http://localhost:8080/chat").await;
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }
}
