//! Common test helpers and utilities for dispatch tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A mock STOMP broker over the memory or WebSocket transport, cleaned up
//!   on drop
//! - Collectors for handler and event verification

use bytes::Bytes;
use dashmap::DashMap;
use dispatch_core::{Command, Frame, FrameReader, Heartbeat, Inbound};
use dispatch_transport::{
    memory_pair, Connector, LinkStats, MemoryConnector, TransportEvent, TransportReceiver,
    TransportSender, TransportServer, WebSocketServer,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicUsize, target: usize, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Receive broadcast events until one matches, or give up after `max_wait`
pub async fn wait_for_event<E, F>(
    events: &mut broadcast::Receiver<E>,
    matches: F,
    max_wait: Duration,
) -> Option<E>
where
    E: Clone,
    F: Fn(&E) -> bool,
{
    let deadline = Instant::now() + max_wait;
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) if matches(&event) => return Some(event),
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
        }
    }
}

// ============================================================================
// Collectors - for verifying what handlers received
// ============================================================================

/// Thread-safe collector of values handed to a callback
#[derive(Clone)]
pub struct Collector<T> {
    values: Arc<Mutex<Vec<T>>>,
    count: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl<T: Clone + Send + 'static> Collector<T> {
    pub fn new() -> Self {
        Self {
            values: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(AtomicUsize::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a callback that records every value it is given
    pub fn callback(&self) -> impl Fn(T) + Send + Sync + 'static {
        let values = self.values.clone();
        let count = self.count.clone();
        let notify = self.notify.clone();

        move |value| {
            values.lock().push(value);
            count.fetch_add(1, Ordering::SeqCst);
            notify.notify_waiters();
        }
    }

    /// Get the count of received values
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait for at least n values to be received
    pub async fn wait_for_count(&self, n: usize, max_wait: Duration) -> bool {
        wait_for_count(&self.count, n, max_wait).await
    }

    /// Get all collected values
    pub fn values(&self) -> Vec<T> {
        self.values.lock().clone()
    }

    /// Get the last value received
    pub fn last(&self) -> Option<T> {
        self.values.lock().last().cloned()
    }

    /// Clear all collected values
    pub fn clear(&self) {
        self.values.lock().clear();
        self.count.store(0, Ordering::SeqCst);
    }
}

impl<T: Clone + Send + 'static> Default for Collector<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Mock Broker - RAII wrapper with proper cleanup
// ============================================================================

/// A frame received by the broker, tagged with the connection it came from
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub connection: Uuid,
    pub frame: Frame,
}

struct Connection {
    sender: Arc<dyn TransportSender>,
    /// subscription id → destination
    subscriptions: Mutex<Vec<(String, String)>>,
}

struct BrokerState {
    required_token: Mutex<Option<String>>,
    heartbeat: Mutex<Heartbeat>,
    emit_heartbeats: Mutex<bool>,
    reject_handshakes: AtomicUsize,
    stall_handshakes: AtomicUsize,

    frames: Mutex<Vec<ReceivedFrame>>,
    connections: DashMap<Uuid, Arc<Connection>>,
    accepted: AtomicUsize,
    duplicate_subscribes: AtomicUsize,
    heartbeats: AtomicUsize,
    next_message_id: AtomicU64,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            required_token: Mutex::new(None),
            heartbeat: Mutex::new(Heartbeat::DISABLED),
            emit_heartbeats: Mutex::new(true),
            reject_handshakes: AtomicUsize::new(0),
            stall_handshakes: AtomicUsize::new(0),
            frames: Mutex::new(Vec::new()),
            connections: DashMap::new(),
            accepted: AtomicUsize::new(0),
            duplicate_subscribes: AtomicUsize::new(0),
            heartbeats: AtomicUsize::new(0),
            next_message_id: AtomicU64::new(1),
        }
    }
}

/// A minimal STOMP 1.2 broker for tests
///
/// Accepts CONNECT (optionally checking the `token` query parameter),
/// records every client frame, tracks subscriptions per connection and
/// delivers [`publish`](Self::publish)ed bodies as MESSAGE frames.
pub struct MockBroker {
    state: Arc<BrokerState>,
    url: String,
    connector: Option<MemoryConnector>,
    handle: Option<JoinHandle<()>>,
}

impl MockBroker {
    /// Start a broker on the in-process transport
    pub fn start() -> Self {
        let (connector, mut listener) = memory_pair();
        let state = Arc::new(BrokerState::new());

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Some(peer) = listener.accept().await {
                let sender: Arc<dyn TransportSender> = Arc::new(peer.sender);
                tokio::spawn(serve(accept_state.clone(), sender, peer.receiver, peer.target));
            }
        });

        Self {
            state,
            url: "mem://broker/chat".to_string(),
            connector: Some(connector),
            handle: Some(handle),
        }
    }

    /// Start a broker listening for WebSocket connections on a free local port
    pub async fn start_websocket() -> Self {
        let mut server = WebSocketServer::bind("127.0.0.1:0")
            .await
            .expect("bind mock broker");
        let addr = server.local_addr().expect("mock broker address");
        let state = Arc::new(BrokerState::new());

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok(accepted) = server.accept().await {
                let sender: Arc<dyn TransportSender> = Arc::new(accepted.sender);
                tokio::spawn(serve(
                    accept_state.clone(),
                    sender,
                    accepted.receiver,
                    accepted.target,
                ));
            }
        });

        Self {
            state,
            url: format!("ws://{}/chat", addr),
            connector: None,
            handle: Some(handle),
        }
    }

    /// Endpoint to configure clients with
    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Connector reaching this broker. Panics for WebSocket brokers, which
    /// are reached through their URL.
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.memory_connector().clone())
    }

    fn memory_connector(&self) -> &MemoryConnector {
        self.connector
            .as_ref()
            .expect("only in-process brokers have a connector")
    }

    /// Connection counters of the in-process transport
    pub fn stats(&self) -> Arc<LinkStats> {
        self.memory_connector().stats()
    }

    /// While set, connection attempts are refused
    pub fn set_refuse(&self, refuse: bool) {
        self.memory_connector().set_refuse(refuse);
    }

    // === Behaviour ===

    /// Only accept CONNECT when the `token` query parameter equals `token`
    pub fn require_token(&self, token: &str) {
        *self.state.required_token.lock() = Some(token.to_string());
    }

    /// Answer the next `n` CONNECT frames with ERROR
    pub fn reject_handshakes(&self, n: usize) {
        self.state.reject_handshakes.store(n, Ordering::SeqCst);
    }

    /// Leave the next `n` CONNECT frames unanswered, keeping their
    /// connections open until the client leaves
    pub fn stall_handshakes(&self, n: usize) {
        self.state.stall_handshakes.store(n, Ordering::SeqCst);
    }

    /// Heart-beat header sent in CONNECTED. When `emit` is false the broker
    /// advertises beats but never sends them.
    pub fn set_heartbeat(&self, heartbeat: Heartbeat, emit: bool) {
        *self.state.heartbeat.lock() = heartbeat;
        *self.state.emit_heartbeats.lock() = emit;
    }

    // === Actions ===

    /// Deliver `body` to every subscription on `destination`. Returns the
    /// number of MESSAGE frames sent.
    pub async fn publish(&self, destination: &str, body: &str) -> usize {
        let mut delivered = 0;
        for (_, connection) in self.connections() {
            let ids: Vec<String> = connection
                .subscriptions
                .lock()
                .iter()
                .filter(|(_, dest)| same_channel(dest, destination))
                .map(|(id, _)| id.clone())
                .collect();

            for id in ids {
                let message_id = self.state.next_message_id.fetch_add(1, Ordering::SeqCst);
                let frame = Frame::message(destination, &id, &message_id.to_string(), body.to_string());
                if connection.sender.send(frame.encode()).await.is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Send a frame to every connection as is
    pub async fn send_to_all(&self, frame: &Frame) {
        self.send_raw(frame.encode()).await;
    }

    /// Send raw bytes to every connection
    pub async fn send_raw(&self, data: Bytes) {
        for (_, connection) in self.connections() {
            let _ = connection.sender.send(data.clone()).await;
        }
    }

    /// Send ERROR to every connection, then close them
    pub async fn send_error(&self, message: &str) {
        self.send_to_all(&Frame::error(message)).await;
        self.drop_connections().await;
    }

    /// Close every connection without a frame
    pub async fn drop_connections(&self) {
        for (id, connection) in self.connections() {
            let _ = connection.sender.close().await;
            self.state.connections.remove(&id);
        }
    }

    fn connections(&self) -> Vec<(Uuid, Arc<Connection>)> {
        self.state
            .connections
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    // === Inspection ===

    /// Every client frame received so far, in arrival order
    pub fn frames(&self) -> Vec<Frame> {
        self.state
            .frames
            .lock()
            .iter()
            .map(|r| r.frame.clone())
            .collect()
    }

    pub fn received(&self) -> Vec<ReceivedFrame> {
        self.state.frames.lock().clone()
    }

    pub fn frames_of(&self, command: Command) -> Vec<Frame> {
        self.frames()
            .into_iter()
            .filter(|f| f.command == command)
            .collect()
    }

    /// Ids of every SUBSCRIBE received, in order
    pub fn subscribe_ids(&self) -> Vec<String> {
        self.frames_of(Command::Subscribe)
            .iter()
            .filter_map(|f| f.header("id").map(str::to_string))
            .collect()
    }

    /// (id, destination) of subscriptions live on open connections
    pub fn active_subscriptions(&self) -> Vec<(String, String)> {
        self.connections()
            .iter()
            .flat_map(|(_, c)| c.subscriptions.lock().clone())
            .collect()
    }

    /// SUBSCRIBE frames that reused an id already active on their connection
    pub fn duplicate_subscribes(&self) -> usize {
        self.state.duplicate_subscribes.load(Ordering::SeqCst)
    }

    /// Heart-beat EOLs received from clients
    pub fn heartbeats_received(&self) -> usize {
        self.state.heartbeats.load(Ordering::SeqCst)
    }

    /// Connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Connections currently open
    pub fn active_connections(&self) -> usize {
        self.state.connections.len()
    }

    pub fn clear_frames(&self) {
        self.state.frames.lock().clear();
    }

    /// Wait until at least `n` received frames satisfy `matches`
    pub async fn wait_for_frames<F>(&self, matches: F, n: usize, max_wait: Duration) -> bool
    where
        F: Fn(&Frame) -> bool,
    {
        let frames = &self.state.frames;
        let matches = &matches;
        wait_for(
            move || async move { frames.lock().iter().filter(|r| matches(&r.frame)).count() >= n },
            DEFAULT_CHECK_INTERVAL,
            max_wait,
        )
        .await
    }

    /// Wait until `n` SUBSCRIBE frames have arrived
    pub async fn wait_for_subscribes(&self, n: usize, max_wait: Duration) -> bool {
        self.wait_for_frames(|f| f.command == Command::Subscribe, n, max_wait)
            .await
    }

    /// Stop the broker explicitly (also happens on drop)
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn same_channel(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

fn query_token(target: &str) -> Option<&str> {
    let (_, query) = target.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
}

/// Serve one client connection until it closes
async fn serve<R>(state: Arc<BrokerState>, sender: Arc<dyn TransportSender>, mut receiver: R, target: String)
where
    R: TransportReceiver + 'static,
{
    let id = Uuid::new_v4();
    state.accepted.fetch_add(1, Ordering::SeqCst);
    let connection = Arc::new(Connection {
        sender: sender.clone(),
        subscriptions: Mutex::new(Vec::new()),
    });
    state.connections.insert(id, connection.clone());
    debug!("Mock broker connection {} to {}", id, target);

    let mut reader = FrameReader::new();
    let mut heartbeat_task: Option<JoinHandle<()>> = None;

    'conn: while let Some(event) = receiver.recv().await {
        let data = match event {
            TransportEvent::Data(data) => data,
            TransportEvent::Connected | TransportEvent::Error(_) => continue,
            TransportEvent::Disconnected { .. } => break,
        };
        reader.push(&data);

        loop {
            let frame = match reader.next() {
                Ok(Some(Inbound::Frame(frame))) => frame,
                Ok(Some(Inbound::Heartbeat)) => {
                    state.heartbeats.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Mock broker got a malformed frame: {}", e);
                    reader = FrameReader::new();
                    break;
                }
            };

            state.frames.lock().push(ReceivedFrame {
                connection: id,
                frame: frame.clone(),
            });

            match frame.command {
                Command::Connect | Command::Stomp => {
                    if take_one(&state.stall_handshakes) {
                        debug!("Mock broker stalling handshake on {}", id);
                        continue;
                    }
                    if let Some(reason) = rejection(&state, &target) {
                        let _ = sender.send(Frame::error(&reason).encode()).await;
                        let _ = sender.close().await;
                        break 'conn;
                    }

                    let heartbeat = *state.heartbeat.lock();
                    let connected = Frame::new(Command::Connected)
                        .with_header("version", dispatch_core::STOMP_VERSION)
                        .with_header("session", id.to_string())
                        .with_header("server", "mock-broker/1.0")
                        .with_header("heart-beat", heartbeat.to_string());
                    let _ = sender.send(connected.encode()).await;

                    if heartbeat.outgoing_ms > 0 && *state.emit_heartbeats.lock() {
                        heartbeat_task = Some(spawn_heartbeats(
                            sender.clone(),
                            Duration::from_millis(heartbeat.outgoing_ms),
                        ));
                    }
                }
                Command::Subscribe => {
                    let (Some(sub_id), Some(destination)) = (frame.header("id"), frame.header("destination")) else {
                        continue;
                    };
                    let mut subs = connection.subscriptions.lock();
                    if subs.iter().any(|(existing, _)| existing == sub_id) {
                        state.duplicate_subscribes.fetch_add(1, Ordering::SeqCst);
                        subs.retain(|(existing, _)| existing != sub_id);
                    }
                    subs.push((sub_id.to_string(), destination.to_string()));
                }
                Command::Unsubscribe => {
                    if let Some(sub_id) = frame.header("id") {
                        connection
                            .subscriptions
                            .lock()
                            .retain(|(existing, _)| existing != sub_id);
                    }
                }
                Command::Disconnect => {
                    if let Some(receipt) = frame.header("receipt") {
                        let reply = Frame::new(Command::Receipt).with_header("receipt-id", receipt);
                        let _ = sender.send(reply.encode()).await;
                    }
                    let _ = sender.close().await;
                    break 'conn;
                }
                _ => {}
            }
        }
    }

    if let Some(task) = heartbeat_task {
        task.abort();
    }
    state.connections.remove(&id);
    debug!("Mock broker connection {} closed", id);
}

/// Decrement `counter` if it is non-zero; true when it was
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn rejection(state: &BrokerState, target: &str) -> Option<String> {
    if take_one(&state.reject_handshakes) {
        return Some("handshake rejected".to_string());
    }
    if let Some(required) = state.required_token.lock().as_deref() {
        if query_token(target) != Some(required) {
            return Some("invalid token".to_string());
        }
    }
    None
}

fn spawn_heartbeats(sender: Arc<dyn TransportSender>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if sender.send(Bytes::from_static(b"\n")).await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_token() {
        assert_eq!(query_token("/chat?token=abc.def"), Some("abc.def"));
        assert_eq!(query_token("mem://broker/chat?lang=en&token=t"), Some("t"));
        assert_eq!(query_token("/chat"), None);
    }

    #[test]
    fn test_take_one_stops_at_zero() {
        let counter = AtomicUsize::new(2);
        assert!(take_one(&counter));
        assert!(take_one(&counter));
        assert!(!take_one(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_collector() {
        let collector = Collector::<u32>::new();
        let callback = collector.callback();
        callback(1);
        callback(2);
        assert!(collector.wait_for_count(2, DEFAULT_TIMEOUT).await);
        assert_eq!(collector.values(), vec![1, 2]);
        assert_eq!(collector.last(), Some(2));
    }

    #[tokio::test]
    async fn test_broker_handshake_and_publish() {
        let broker = MockBroker::start();
        let connector = broker.connector();
        let (sender, mut receiver) = connector.connect("mem://broker/chat?token=t").await.unwrap();

        let connect = Frame::connect("localhost", Heartbeat::DISABLED);
        sender.send(connect.encode()).await.unwrap();
        sender
            .send(Frame::subscribe("event-42", "/user/event/42").encode())
            .await
            .unwrap();
        assert!(broker.wait_for_subscribes(1, DEFAULT_TIMEOUT).await);

        assert_eq!(broker.publish("/user/event/42", r#"{"id":42}"#).await, 1);

        let mut reader = FrameReader::new();
        let mut commands = Vec::new();
        while commands.len() < 2 {
            match receiver.recv().await {
                Some(TransportEvent::Data(data)) => {
                    reader.push(&data);
                    while let Ok(Some(Inbound::Frame(frame))) = reader.next() {
                        commands.push(frame.command);
                    }
                }
                Some(_) => continue,
                None => break,
            }
        }
        assert_eq!(commands, vec![Command::Connected, Command::Message]);
    }
}
