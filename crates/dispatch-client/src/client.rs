//! Main dispatch client implementation

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::{Destination, TopicId};
use dispatch_transport::{Connector, WebSocketTransport};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use crate::builder::DispatchClientBuilder;
use crate::config::ClientConfig;
use crate::decode::PayloadKind;
use crate::error::{ClientError, Result, SessionError};
use crate::event::{ApplicationEvent, ClientEvent};
use crate::publisher::OutboundMessage;
use crate::registry::{Scope, Subscription};
use crate::session::{Command, Session};
use crate::state::{SessionState, SessionStatus};

struct Inner {
    config: ClientConfig,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    events: broadcast::Sender<ClientEvent>,
}

/// Handle to one dispatch session
///
/// Cloning is cheap; every clone talks to the same session. The session
/// stops after [`shutdown`](Self::shutdown) or once the last handle is dropped.
#[derive(Clone)]
pub struct DispatchClient {
    inner: Arc<Inner>,
}

impl DispatchClient {
    /// Create a client over WebSocket (use builder for more options).
    /// Must be called inside a tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(WebSocketTransport::new()))
    }

    /// Create a client over any transport
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let handle = Session::spawn(config.clone(), connector);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                commands: handle.commands,
                status: handle.status,
                events: handle.events,
            }),
        })
    }

    /// Create a builder
    pub fn builder(url: &str) -> DispatchClientBuilder {
        DispatchClientBuilder::new(url)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .commands
            .send(make(tx))
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }

    // === Lifecycle ===

    /// Start connecting with `credential`. Returns once the attempt is
    /// under way; the outcome arrives through state and events. A no-op
    /// while connecting or connected.
    pub async fn connect(&self, credential: &str) -> Result<()> {
        let credential = credential.to_string();
        self.request(|reply| Command::Connect { credential, reply })
            .await
    }

    /// Connect and wait for the handshake to settle
    pub async fn connect_and_wait(&self, credential: &str) -> Result<()> {
        let mut status = self.inner.status.clone();
        self.connect(credential).await?;

        let settled = status
            .wait_for(|s| s.state != SessionState::Connecting)
            .await
            .map_err(|_| ClientError::SessionClosed)?
            .clone();

        match settled.state {
            SessionState::Connected => Ok(()),
            _ => Err(settled
                .last_error
                .map(ClientError::from)
                .unwrap_or(ClientError::NotConnected)),
        }
    }

    /// Close the link and cancel any pending reconnect
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Tear down and connect again with the last credential
    pub async fn reconnect(&self) -> Result<()> {
        self.request(|reply| Command::Reconnect { reply }).await
    }

    /// Disconnect, drop every subscription and stop the session
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Shutdown { reply: tx })
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    // === Subscriptions ===

    /// Register a subscription, replacing any with the same topic id
    pub async fn subscribe(&self, subscription: Subscription) -> Result<()> {
        self.request(|reply| Command::Subscribe {
            subscription,
            reply,
        })
        .await
    }

    /// Subscribe with one of the built-in decoders
    pub async fn subscribe_kind<F>(
        &self,
        topic_id: impl Into<TopicId>,
        destination: &str,
        kind: PayloadKind,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(ApplicationEvent) + Send + Sync + 'static,
    {
        let destination = Destination::parse(destination)?;
        self.subscribe(Subscription::of_kind(topic_id, destination, kind, handler))
            .await
    }

    pub async fn unsubscribe(&self, topic_id: impl Into<TopicId>) -> Result<()> {
        let topic_id = topic_id.into();
        self.request(|reply| Command::Unsubscribe { topic_id, reply })
            .await
    }

    /// Registered topic ids, in replay order
    pub async fn topics(&self) -> Result<Vec<TopicId>> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Topics { reply: tx })
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    // === Publishing ===

    pub async fn publish(&self, message: OutboundMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.request(|reply| Command::Publish { message, reply })
            .await
    }

    /// Serialize `payload` as JSON and publish it to `destination`
    pub async fn publish_json<T: Serialize + ?Sized>(&self, destination: &str, payload: &T) -> Result<()> {
        let message = OutboundMessage::json(Destination::parse(destination)?, payload)?;
        self.publish(message).await
    }

    // === Dispatch operations ===

    /// Follow an event: subscribe to its updates and live location, then
    /// announce the join. `handler` receives both payload kinds.
    pub async fn join_event<F>(&self, event_id: &str, user_id: &str, handler: F) -> Result<()>
    where
        F: Fn(ApplicationEvent) + Send + Sync + 'static,
    {
        let message = OutboundMessage::join_event(event_id, user_id)?;
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let handler = Arc::new(handler);
        let on_event = handler.clone();
        let subscriptions = vec![
            Subscription::of_kind(
                TopicId::event(event_id),
                Destination::event(event_id)?,
                PayloadKind::EventUpdate,
                move |event| on_event(event),
            ),
            Subscription::of_kind(
                TopicId::live_location(event_id),
                Destination::live_location(event_id)?,
                PayloadKind::LiveLocationUpdate,
                move |event| handler(event),
            ),
        ];

        debug!("Joining event {}", event_id);
        self.request(|reply| Command::Join {
            subscriptions,
            message,
            reply,
        })
        .await
    }

    /// Stop following an event
    pub async fn leave_event(&self, event_id: &str) -> Result<()> {
        let event = self.unsubscribe(TopicId::event(event_id)).await;
        let location = self.unsubscribe(TopicId::live_location(event_id)).await;
        event.and(location)
    }

    /// Publish a position for an event. Coordinates are checked first.
    pub async fn send_location(&self, event_id: &str, latitude: f64, longitude: f64) -> Result<()> {
        let message = OutboundMessage::location_update(event_id, latitude, longitude)?;
        self.publish(message).await
    }

    /// Notifications addressed to `user_id`, kept for the life of the session
    pub async fn watch_notifications<F>(&self, user_id: &str, handler: F) -> Result<()>
    where
        F: Fn(ApplicationEvent) + Send + Sync + 'static,
    {
        let subscription = Subscription::of_kind(
            TopicId::notification(user_id),
            Destination::notification(user_id)?,
            PayloadKind::Notification,
            handler,
        )
        .with_scope(Scope::Standing);
        self.subscribe(subscription).await
    }

    /// The ambulance provider's active-incident broadcast
    pub async fn watch_active_incidents<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(ApplicationEvent) + Send + Sync + 'static,
    {
        let subscription = Subscription::of_kind(
            TopicId::active_incidents(),
            Destination::active_incidents(),
            PayloadKind::ActiveIncidentList,
            handler,
        )
        .with_scope(Scope::Standing);
        self.subscribe(subscription).await
    }

    /// The hospital admit-request broadcast
    pub async fn watch_admit_requests<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(ApplicationEvent) + Send + Sync + 'static,
    {
        let subscription = Subscription::of_kind(
            TopicId::admit_requests(),
            Destination::admit_requests(),
            PayloadKind::AdmitRequest,
            handler,
        )
        .with_scope(Scope::Standing);
        self.subscribe(subscription).await
    }

    // === Observers ===

    pub fn state(&self) -> SessionState {
        self.inner.status.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Snapshot of the session
    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.inner.status.borrow().last_error.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.status.borrow().session_id.clone()
    }

    /// Subscribe to session events. Only events sent after this call are seen.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Watch the status; `changed()` fires on every update
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.clone()
    }

    /// Wait until the session reaches `state`
    pub async fn wait_for_state(&self, state: SessionState, timeout: Duration) -> Result<()> {
        let mut status = self.inner.status.clone();
        tokio::time::timeout(timeout, status.wait_for(|s| s.state == state))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|_| ClientError::SessionClosed)?;
        Ok(())
    }
}

impl std::fmt::Debug for DispatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchClient")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish()
    }
}
