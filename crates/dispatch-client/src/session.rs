//! Session actor
//!
//! One task owns the link, the registry, the reconnect timer and the
//! heart-beat clocks. Client handles talk to it over a command channel and
//! observe it through a watch (status) and a broadcast (events). Nothing
//! else mutates session state, so none of it is behind a lock.

use std::future::{pending, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dispatch_core::{Command as StompCommand, Frame, Heartbeat, TopicId};
use dispatch_transport::Connector;
use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, SubscriptionRetention};
use crate::error::{ClientError, Result, SessionError};
use crate::event::ClientEvent;
use crate::link::{error_reason, Handshake, LinkEvent, StompLink};
use crate::publisher::OutboundMessage;
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::router::{self, RouteOutcome};
use crate::state::{SessionState, SessionStatus};

type Reply<T> = oneshot::Sender<Result<T>>;
type ConnectFuture = BoxFuture<'static, std::result::Result<(StompLink, Handshake), SessionError>>;

/// Requests from client handles
pub(crate) enum Command {
    Connect {
        credential: String,
        reply: Reply<()>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    Reconnect {
        reply: Reply<()>,
    },
    Subscribe {
        subscription: Subscription,
        reply: Reply<()>,
    },
    Unsubscribe {
        topic_id: TopicId,
        reply: Reply<()>,
    },
    Publish {
        message: OutboundMessage,
        reply: Reply<()>,
    },
    /// Subscribe and publish as one step, only while connected
    Join {
        subscriptions: Vec<Subscription>,
        message: OutboundMessage,
        reply: Reply<()>,
    },
    Topics {
        reply: oneshot::Sender<Vec<TopicId>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Channels a client handle keeps to reach its session
pub(crate) struct SessionHandle {
    pub commands: mpsc::Sender<Command>,
    pub status: watch::Receiver<SessionStatus>,
    pub events: broadcast::Sender<ClientEvent>,
}

pub(crate) struct Session {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    commands: mpsc::Receiver<Command>,
    status_tx: watch::Sender<SessionStatus>,
    events: broadcast::Sender<ClientEvent>,

    status: SessionStatus,
    credential: Option<String>,
    registry: SubscriptionRegistry,

    link: Option<StompLink>,
    connecting: Option<ConnectFuture>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    heartbeat_send: Option<Interval>,
    heartbeat_check: Option<Interval>,
}

impl Session {
    /// Spawn the session task on the current runtime
    pub(crate) fn spawn(config: ClientConfig, connector: Arc<dyn Connector>) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let (events, _) = broadcast::channel(config.event_capacity);

        let session = Session {
            config,
            connector,
            commands: command_rx,
            status_tx,
            events: events.clone(),
            status: SessionStatus::default(),
            credential: None,
            registry: SubscriptionRegistry::new(),
            link: None,
            connecting: None,
            reconnect_timer: None,
            heartbeat_send: None,
            heartbeat_check: None,
        };
        tokio::spawn(session.run());

        SessionHandle {
            commands: command_tx,
            status: status_rx,
            events,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("All client handles dropped");
                        self.shutdown().await;
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                result = poll_slot(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result).await;
                }
                event = next_link_event(&mut self.link) => self.on_link_event(event).await,
                _ = tick(&mut self.heartbeat_send) => self.send_heartbeat().await,
                _ = tick(&mut self.heartbeat_check) => self.check_heartbeat().await,
                _ = poll_slot(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.on_reconnect_timer();
                }
            }
        }
        debug!("Session task stopped");
    }

    /// Returns false once the session should stop
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect { credential, reply } => {
                let _ = reply.send(self.connect(credential));
            }
            Command::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(Ok(()));
            }
            Command::Reconnect { reply } => {
                let result = match self.credential.clone() {
                    Some(credential) => {
                        self.disconnect().await;
                        self.connect(credential)
                    }
                    None => Err(ClientError::NoCredential),
                };
                let _ = reply.send(result);
            }
            Command::Subscribe {
                subscription,
                reply,
            } => {
                let _ = reply.send(self.subscribe(subscription).await);
            }
            Command::Unsubscribe { topic_id, reply } => {
                let _ = reply.send(self.unsubscribe(&topic_id).await);
            }
            Command::Publish { message, reply } => {
                let _ = reply.send(self.publish(&message).await);
            }
            Command::Join {
                subscriptions,
                message,
                reply,
            } => {
                let _ = reply.send(self.join(subscriptions, &message).await);
            }
            Command::Topics { reply } => {
                let _ = reply.send(self.registry.topic_ids().cloned().collect());
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn is_connected(&self) -> bool {
        self.status.state.is_connected() && self.link.is_some()
    }

    // === Lifecycle ===

    fn connect(&mut self, credential: String) -> Result<()> {
        if credential.is_empty() {
            return Err(ClientError::NoCredential);
        }
        if self.status.state.is_active() {
            debug!("Connect ignored, session is {}", self.status.state);
            return Ok(());
        }

        let url = self.config.connection_url(&credential)?;
        self.credential = Some(credential);
        self.cancel_reconnect();

        info!("Connecting to {}", self.config.url);
        let connector = self.connector.clone();
        let host = self.config.virtual_host();
        let offer = self.config.heartbeat_offer();
        let timeout = self.config.connect_timeout();
        self.connecting = Some(Box::pin(async move {
            StompLink::open(connector.as_ref(), &url, &host, offer, timeout).await
        }));

        self.set_state(SessionState::Connecting);
        Ok(())
    }

    async fn on_connect_result(
        &mut self,
        result: std::result::Result<(StompLink, Handshake), SessionError>,
    ) {
        let (mut link, handshake) = match result {
            Ok(opened) => opened,
            Err(SessionError::TransportClosed(reason)) => {
                self.transport_closed(reason).await;
                return;
            }
            Err(e) => {
                self.fail(e).await;
                return;
            }
        };

        let frames = self.registry.replay_all();
        let replayed = frames.len();
        for frame in &frames {
            if let Err(e) = link.send(frame).await {
                link.close(false).await;
                self.transport_closed(Some(e.to_string())).await;
                return;
            }
        }
        if replayed > 0 {
            info!("Replayed {} subscriptions", replayed);
        }

        self.start_heartbeats(handshake.heartbeat);
        self.link = Some(link);

        self.status.last_error = None;
        self.status.session_id = handshake.session_id.clone();
        self.status.server = handshake.server;
        self.status.user_name = handshake.user_name;
        self.status.heartbeat = handshake.heartbeat;
        self.status.reconnect_pending = false;
        self.set_state(SessionState::Connected);

        self.emit(ClientEvent::Connected {
            session_id: handshake.session_id,
        });
    }

    /// Handshake or protocol failure: Failed, and one retry after the delay
    async fn fail(&mut self, error: SessionError) {
        warn!("Session failed: {}", error);
        self.drop_link(false).await;

        self.status.last_error = Some(error.clone());
        self.clear_session_info();
        let delay = self.arm_reconnect();
        self.set_state(SessionState::Failed);
        self.emit(ClientEvent::Error(error));
        self.emit(ClientEvent::ReconnectScheduled { delay });
    }

    /// The transport went away without a protocol error
    async fn transport_closed(&mut self, reason: Option<String>) {
        info!(
            "Transport closed: {}",
            reason.as_deref().unwrap_or("no reason given")
        );
        self.drop_link(false).await;

        self.status.last_error = Some(SessionError::TransportClosed(reason.clone()));
        self.clear_session_info();
        let delay = self
            .config
            .reconnect_on_close
            .then(|| self.arm_reconnect());
        self.set_state(SessionState::Disconnected);
        self.emit(ClientEvent::Disconnected { reason });
        if let Some(delay) = delay {
            self.emit(ClientEvent::ReconnectScheduled { delay });
        }
    }

    async fn disconnect(&mut self) {
        self.cancel_reconnect();
        if self.connecting.take().is_some() {
            debug!("Abandoned in-flight connect");
        }

        let had_link = self.link.is_some();
        self.drop_link(true).await;

        if self.config.retention == SubscriptionRetention::ClearOnDisconnect {
            let cleared = self.registry.clear_joined();
            if cleared > 0 {
                debug!("Cleared {} joined subscriptions", cleared);
            }
        }

        self.status.last_error = None;
        self.clear_session_info();
        self.set_state(SessionState::Disconnected);
        if had_link {
            info!("Disconnected");
            self.emit(ClientEvent::Disconnected { reason: None });
        }
    }

    async fn shutdown(&mut self) {
        self.disconnect().await;
        self.registry.clear();
        self.credential = None;
    }

    /// Close and forget the current link
    async fn drop_link(&mut self, graceful: bool) {
        if let Some(mut link) = self.link.take() {
            link.close(graceful).await;
        }
        self.registry.transport_lost();
        self.heartbeat_send = None;
        self.heartbeat_check = None;
    }

    // === Reconnect timer ===

    /// Arm the single reconnect slot, replacing any pending timer. The
    /// caller publishes the status change.
    fn arm_reconnect(&mut self) -> Duration {
        let delay = self.config.reconnect_delay();
        if self.reconnect_timer.is_some() {
            debug!("Replacing pending reconnect timer");
        }
        self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
        self.status.reconnect_pending = true;

        info!("Reconnecting in {:?}", delay);
        delay
    }

    fn cancel_reconnect(&mut self) {
        if self.reconnect_timer.take().is_some() {
            debug!("Cancelled pending reconnect");
        }
        if self.status.reconnect_pending {
            self.status.reconnect_pending = false;
            self.publish_status();
        }
    }

    fn on_reconnect_timer(&mut self) {
        self.status.reconnect_pending = false;
        self.publish_status();

        let Some(credential) = self.credential.clone() else {
            return;
        };
        if let Err(e) = self.connect(credential) {
            error!("Scheduled reconnect failed to start: {}", e);
        }
    }

    // === Heart-beats ===

    fn start_heartbeats(&mut self, heartbeat: Heartbeat) {
        // Checked at half the interval so no gap exceeds it
        self.heartbeat_send = heartbeat
            .send_interval()
            .map(|every| delayed_interval(every / 2));
        self.heartbeat_check = heartbeat
            .receive_deadline()
            .map(|deadline| delayed_interval(deadline / 2));
    }

    async fn send_heartbeat(&mut self) {
        let Some(every) = self.status.heartbeat.send_interval() else {
            return;
        };
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if link.idle_for() < every / 2 {
            return;
        }
        if let Err(e) = link.send_heartbeat().await {
            debug!("Heart-beat not sent: {}", e);
        }
    }

    async fn check_heartbeat(&mut self) {
        let Some(deadline) = self.status.heartbeat.receive_deadline() else {
            return;
        };
        let silent = match &self.link {
            Some(link) => link.silent_for(),
            None => return,
        };
        if silent > deadline {
            warn!("No data from broker for {:?}, closing link", silent);
            self.transport_closed(Some("heartbeat timeout".to_string()))
                .await;
        }
    }

    // === Inbound ===

    async fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Frame(frame) => self.on_frame(frame).await,
            LinkEvent::Closed(reason) => self.transport_closed(reason).await,
            LinkEvent::Invalid(e) => warn!("Discarded malformed frame: {}", e),
        }
    }

    async fn on_frame(&mut self, frame: Frame) {
        match frame.command {
            StompCommand::Message => {
                let outcome = router::route(&self.registry, &frame);
                match outcome {
                    RouteOutcome::Delivered { .. } => {}
                    RouteOutcome::Unrouted { destination } => {
                        self.emit(ClientEvent::Unrouted { destination });
                    }
                    RouteOutcome::DecodeFailed {
                        topic_id,
                        destination,
                        reason,
                    } => {
                        self.emit(ClientEvent::DecodeFailed {
                            topic_id,
                            destination,
                            reason,
                        });
                    }
                    RouteOutcome::HandlerPanicked { topic_id } => {
                        self.emit(ClientEvent::HandlerPanicked { topic_id });
                    }
                }
            }
            StompCommand::Error => {
                let reason = error_reason(&frame);
                self.fail(SessionError::Protocol(reason)).await;
            }
            StompCommand::Receipt => {
                debug!("Receipt {:?}", frame.header("receipt-id"));
            }
            other => debug!("Ignoring unexpected {} frame", other),
        }
    }

    // === Subscriptions and publishing ===

    async fn subscribe(&mut self, subscription: Subscription) -> Result<()> {
        debug!(
            "Subscribe {} -> {}",
            subscription.topic_id, subscription.destination
        );
        let connected = self.is_connected();
        let frames = self.registry.subscribe(subscription, connected);
        self.send_frames(&frames).await
    }

    async fn unsubscribe(&mut self, topic_id: &TopicId) -> Result<()> {
        let (_, frame) = self
            .registry
            .unsubscribe(topic_id.as_str())
            .ok_or_else(|| ClientError::UnknownTopic(topic_id.clone()))?;
        debug!("Unsubscribe {}", topic_id);
        match frame {
            Some(frame) => self.send_frames(std::slice::from_ref(&frame)).await,
            None => Ok(()),
        }
    }

    async fn publish(&mut self, message: &OutboundMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        debug!("Publish to {}", message.destination);
        self.send_frames(std::slice::from_ref(&message.to_frame()))
            .await
    }

    async fn join(&mut self, subscriptions: Vec<Subscription>, message: &OutboundMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        for subscription in subscriptions {
            self.subscribe(subscription).await?;
        }
        self.publish(message).await
    }

    async fn send_frames(&mut self, frames: &[Frame]) -> Result<()> {
        if frames.is_empty() {
            return Ok(());
        }
        let link = self.link.as_mut().ok_or(ClientError::NotConnected)?;
        for frame in frames {
            link.send(frame).await?;
        }
        Ok(())
    }

    // === Observers ===

    fn set_state(&mut self, state: SessionState) {
        let changed = self.status.state != state;
        self.status.state = state;
        self.publish_status();
        if changed {
            debug!("Session state -> {}", state);
            self.emit(ClientEvent::StateChanged(state));
        }
    }

    fn clear_session_info(&mut self) {
        self.status.session_id = None;
        self.status.server = None;
        self.status.user_name = None;
        self.status.heartbeat = Heartbeat::DISABLED;
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.status.clone());
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn delayed_interval(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Await an optional future; pending forever when the slot is empty
async fn poll_slot<F>(slot: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match slot {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn next_link_event(link: &mut Option<StompLink>) -> LinkEvent {
    match link {
        Some(link) => link.next().await,
        None => pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
