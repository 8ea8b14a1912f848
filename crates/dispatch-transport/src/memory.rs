//! In-process transport
//!
//! [`memory_pair`] returns a [`MemoryConnector`] for the client side and a
//! [`MemoryListener`] that yields the server half of every connection. Each
//! connection is a pair of unbounded channels, so frames are delivered in
//! order without touching the network. [`LinkStats`] counts connections so
//! tests can assert that a client never holds two links at once.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{
    BoxedReceiver, BoxedSender, Connector, TransportEvent, TransportReceiver, TransportSender,
};

/// Connection counters shared by a connector and its links
#[derive(Debug, Default)]
pub struct LinkStats {
    opened: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl LinkStats {
    /// Connections opened so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Connections currently open
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections observed
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn open(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
    }
}

/// Shared by both halves of one connection; closes exactly once
#[derive(Debug)]
struct LinkGuard {
    closed: AtomicBool,
    stats: Arc<LinkStats>,
}

impl LinkGuard {
    fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            self.stats.active.fetch_sub(1, Ordering::SeqCst);
        }
        first
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Sending half; delivers to the opposite side's [`MemoryReceiver`]
pub struct MemorySender {
    tx: mpsc::UnboundedSender<TransportEvent>,
    guard: Arc<LinkGuard>,
}

#[async_trait]
impl TransportSender for MemorySender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if self.guard.is_closed() {
            return Err(TransportError::NotConnected);
        }
        self.tx
            .send(TransportEvent::Data(data))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        !self.guard.is_closed()
    }

    async fn close(&self) -> Result<()> {
        if self.guard.close() {
            let _ = self.tx.send(TransportEvent::Disconnected { reason: None });
        }
        Ok(())
    }
}

impl Drop for MemorySender {
    fn drop(&mut self) {
        if self.guard.close() {
            let _ = self.tx.send(TransportEvent::Disconnected {
                reason: Some("peer dropped".to_string()),
            });
        }
    }
}

/// Receiving half
pub struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Server half of one in-process connection
pub struct MemoryPeer {
    pub sender: MemorySender,
    pub receiver: MemoryReceiver,
    /// URL the client connected to, including its query
    pub target: String,
}

/// Client side of an in-process transport
#[derive(Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    stats: Arc<LinkStats>,
    refuse: Arc<AtomicBool>,
}

impl MemoryConnector {
    pub fn stats(&self) -> Arc<LinkStats> {
        self.stats.clone()
    }

    /// While set, connection attempts fail as if the endpoint were unreachable
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<(BoxedSender, BoxedReceiver)> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "connection refused".to_string(),
            ));
        }

        let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let _ = to_server_tx.send(TransportEvent::Connected);
        let _ = to_client_tx.send(TransportEvent::Connected);

        self.stats.open();
        let guard = Arc::new(LinkGuard {
            closed: AtomicBool::new(false),
            stats: self.stats.clone(),
        });

        let peer = MemoryPeer {
            sender: MemorySender {
                tx: to_client_tx,
                guard: guard.clone(),
            },
            receiver: MemoryReceiver { rx: to_server_rx },
            target: url.to_string(),
        };
        let sender = MemorySender {
            tx: to_server_tx,
            guard,
        };

        // Dropping the rejected peer closes the guard
        self.peers
            .send(peer)
            .map_err(|_| TransportError::ConnectionFailed("listener closed".to_string()))?;

        debug!("Memory link opened to {}", url);
        Ok((Box::new(sender), Box::new(MemoryReceiver { rx: to_client_rx })))
    }
}

/// Server side of an in-process transport
pub struct MemoryListener {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }
}

/// Create a connected connector/listener pair
pub fn memory_pair() -> (MemoryConnector, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            peers: tx,
            stats: Arc::new(LinkStats::default()),
            refuse: Arc::new(AtomicBool::new(false)),
        },
        MemoryListener { peers: rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_stats() {
        let (connector, mut listener) = memory_pair();
        let stats = connector.stats();

        let (sender, mut receiver) = connector.connect("mem://broker?token=t").await.unwrap();
        let mut peer = listener.accept().await.unwrap();
        assert_eq!(peer.target, "mem://broker?token=t");
        assert_eq!(stats.active(), 1);

        assert_eq!(receiver.recv().await, Some(TransportEvent::Connected));
        assert_eq!(peer.receiver.recv().await, Some(TransportEvent::Connected));

        sender.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(
            peer.receiver.recv().await,
            Some(TransportEvent::Data(Bytes::from_static(b"ping")))
        );

        sender.close().await.unwrap();
        assert!(!peer.sender.is_connected());
        assert_eq!(
            peer.receiver.recv().await,
            Some(TransportEvent::Disconnected { reason: None })
        );
        assert_eq!(stats.active(), 0);
        assert_eq!(stats.opened(), 1);
        assert_eq!(stats.peak_active(), 1);
    }

    #[tokio::test]
    async fn test_refuse() {
        let (connector, _listener) = memory_pair();
        connector.set_refuse(true);
        assert!(connector.connect("mem://broker").await.is_err());
        assert_eq!(connector.stats().opened(), 0);
    }

    #[tokio::test]
    async fn test_drop_closes_link() {
        let (connector, mut listener) = memory_pair();
        let (sender, _receiver) = connector.connect("mem://broker").await.unwrap();
        let mut peer = listener.accept().await.unwrap();
        drop(sender);

        assert_eq!(peer.receiver.recv().await, Some(TransportEvent::Connected));
        assert!(matches!(
            peer.receiver.recv().await,
            Some(TransportEvent::Disconnected { .. })
        ));
        assert_eq!(connector.stats().active(), 0);
    }
}
