//! Subscription registry
//!
//! The registry is the source of truth for what the client wants to receive.
//! It outlives individual links: entries are kept across reconnects and
//! replayed after every handshake. It also tracks which topic ids are
//! currently installed at the broker, so a replacing subscribe tears the old
//! transport subscription down first and no id is ever subscribed twice.
//!
//! Methods never touch the network; they return the frames the session must
//! send to keep the broker in line with the registry.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dispatch_core::{Destination, Frame, TopicId};
use indexmap::IndexMap;
use tracing::debug;

use crate::decode::{Decoder, PayloadKind};
use crate::error::{ClientError, Result};
use crate::event::{ApplicationEvent, Payload};

/// Receives decoded events for one subscription
pub type Handler = Arc<dyn Fn(ApplicationEvent) + Send + Sync>;

/// Lifetime class of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Identity or broadcast channels that live as long as the session
    Standing,
    /// Channels joined by the application (events, live locations)
    Joined,
}

/// A registered subscription
#[derive(Clone)]
pub struct Subscription {
    pub topic_id: TopicId,
    pub destination: Destination,
    pub scope: Scope,
    decoder: Decoder,
    handler: Handler,
}

impl Subscription {
    pub fn new(
        topic_id: impl Into<TopicId>,
        destination: Destination,
        decoder: Decoder,
        handler: Handler,
    ) -> Self {
        Self {
            topic_id: topic_id.into(),
            destination,
            scope: Scope::Joined,
            decoder,
            handler,
        }
    }

    /// Subscription using one of the built-in payload decoders
    pub fn of_kind<F>(topic_id: impl Into<TopicId>, destination: Destination, kind: PayloadKind, handler: F) -> Self
    where
        F: Fn(ApplicationEvent) + Send + Sync + 'static,
    {
        Self::new(topic_id, destination, kind.decoder(), Arc::new(handler))
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Decode a frame body with this subscription's decoder
    pub fn decode(&self, body: &[u8]) -> Result<Payload> {
        (self.decoder)(body).map_err(|e| ClientError::Decode {
            topic_id: self.topic_id.clone(),
            reason: e.to_string(),
        })
    }

    pub fn deliver(&self, event: ApplicationEvent) {
        (self.handler)(event)
    }

    fn subscribe_frame(&self) -> Frame {
        Frame::subscribe(self.topic_id.as_str(), self.destination.as_str())
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic_id", &self.topic_id)
            .field("destination", &self.destination)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Topic id → subscription, in insertion order
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: IndexMap<TopicId, Subscription>,
    installed: HashSet<TopicId>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, topic_id: &str) -> Option<&Subscription> {
        self.entries.get(topic_id)
    }

    pub fn contains(&self, topic_id: &str) -> bool {
        self.entries.contains_key(topic_id)
    }

    /// Topic ids in insertion order
    pub fn topic_ids(&self) -> impl Iterator<Item = &TopicId> {
        self.entries.keys()
    }

    /// Whether the topic currently has a live subscription at the broker
    pub fn is_installed(&self, topic_id: &str) -> bool {
        self.installed.contains(topic_id)
    }

    pub fn installed_count(&self) -> usize {
        self.installed.len()
    }

    /// Register or replace. A replaced entry moves to the end of the order.
    /// When `connected`, the returned frames install it at the broker,
    /// preceded by an UNSUBSCRIBE if the id was already installed.
    pub fn subscribe(&mut self, subscription: Subscription, connected: bool) -> Vec<Frame> {
        let topic_id = subscription.topic_id.clone();
        let mut frames = Vec::with_capacity(2);

        if let Some(previous) = self.entries.shift_remove(&topic_id) {
            debug!(
                "Replacing subscription {} ({} -> {})",
                topic_id, previous.destination, subscription.destination
            );
            if self.installed.remove(&topic_id) {
                frames.push(Frame::unsubscribe(topic_id.as_str()));
            }
        }

        if connected {
            frames.push(subscription.subscribe_frame());
            self.installed.insert(topic_id.clone());
        }

        self.entries.insert(topic_id, subscription);
        frames
    }

    /// Remove an entry. The frame, if any, removes it from the broker.
    pub fn unsubscribe(&mut self, topic_id: &str) -> Option<(Subscription, Option<Frame>)> {
        let subscription = self.entries.shift_remove(topic_id)?;
        let frame = self
            .installed
            .remove(topic_id)
            .then(|| Frame::unsubscribe(topic_id));
        Some((subscription, frame))
    }

    /// SUBSCRIBE frames for every entry, in insertion order, for a fresh link
    pub fn replay_all(&mut self) -> Vec<Frame> {
        self.installed.clear();
        let mut frames = Vec::with_capacity(self.entries.len());
        for (topic_id, subscription) in &self.entries {
            frames.push(subscription.subscribe_frame());
            self.installed.insert(topic_id.clone());
        }
        frames
    }

    /// The link is gone; nothing is installed any more
    pub fn transport_lost(&mut self) {
        self.installed.clear();
    }

    /// Drop joined entries, keeping standing ones. Returns how many were removed.
    pub fn clear_joined(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, s| s.scope == Scope::Standing);
        let installed = &mut self.installed;
        installed.retain(|id| self.entries.contains_key(id));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.installed.clear();
    }

    /// Find the subscription a MESSAGE belongs to: by subscription id first,
    /// then by destination
    pub fn resolve(&self, subscription: Option<&str>, destination: Option<&str>) -> Option<&Subscription> {
        if let Some(found) = subscription.and_then(|id| self.entries.get(id)) {
            return Some(found);
        }
        let destination = destination?;
        self.entries
            .values()
            .find(|s| s.destination.same_channel(destination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::Command;

    fn sub(topic: &str, dest: &str) -> Subscription {
        Subscription::of_kind(
            topic,
            Destination::parse(dest).unwrap(),
            PayloadKind::EventUpdate,
            |_| {},
        )
    }

    fn commands(frames: &[Frame]) -> Vec<(Command, Option<String>)> {
        frames
            .iter()
            .map(|f| (f.command, f.header("id").map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_decode_error_names_topic() {
        let subscription = sub("event-1", "/user/event/1");
        assert!(subscription.decode(br#"{"id":1,"status":"NEW"}"#).is_ok());
        match subscription.decode(b"not json") {
            Err(ClientError::Decode { topic_id, reason }) => {
                assert_eq!(topic_id.as_str(), "event-1");
                assert!(!reason.is_empty());
            }
            other => panic!("expected a decode error, got {:?}", other.map(|p| p.kind())),
        }
    }

    #[test]
    fn test_subscribe_while_disconnected_is_queued() {
        let mut registry = SubscriptionRegistry::new();
        let frames = registry.subscribe(sub("event-1", "/user/event/1"), false);
        assert!(frames.is_empty());
        assert!(registry.contains("event-1"));
        assert!(!registry.is_installed("event-1"));
    }

    #[test]
    fn test_replace_installed_unsubscribes_first() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(sub("event-1", "/user/event/1"), true);
        let frames = registry.subscribe(sub("event-1", "/user/event/1"), true);

        assert_eq!(
            commands(&frames),
            vec![
                (Command::Unsubscribe, Some("event-1".to_string())),
                (Command::Subscribe, Some("event-1".to_string())),
            ]
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.installed_count(), 1);
    }

    #[test]
    fn test_replace_moves_to_end() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(sub("a", "/user/event/1"), false);
        registry.subscribe(sub("b", "/user/event/2"), false);
        registry.subscribe(sub("a", "/user/event/3"), false);

        let order: Vec<_> = registry.topic_ids().map(|t| t.as_str().to_string()).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert_eq!(registry.get("a").unwrap().destination.as_str(), "/user/event/3");
    }

    #[test]
    fn test_replay_in_insertion_order() {
        let mut registry = SubscriptionRegistry::new();
        for (t, d) in [("c", "/topic/c/"), ("a", "/topic/a/"), ("b", "/topic/b/")] {
            registry.subscribe(sub(t, d), false);
        }

        let frames = registry.replay_all();
        let ids: Vec<_> = frames.iter().filter_map(|f| f.header("id")).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(registry.installed_count(), 3);

        registry.transport_lost();
        assert_eq!(registry.installed_count(), 0);
        assert_eq!(registry.replay_all().len(), 3);
    }

    #[test]
    fn test_unsubscribe() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(sub("a", "/topic/a/"), true);
        registry.subscribe(sub("b", "/topic/b/"), false);

        let (_, frame) = registry.unsubscribe("a").unwrap();
        assert_eq!(frame.map(|f| f.command), Some(Command::Unsubscribe));

        let (_, frame) = registry.unsubscribe("b").unwrap();
        assert!(frame.is_none());

        assert!(registry.unsubscribe("missing").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_joined_keeps_standing() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(
            sub("notification-1", "/user/notification/1").with_scope(Scope::Standing),
            true,
        );
        registry.subscribe(sub("event-1", "/user/event/1"), true);

        assert_eq!(registry.clear_joined(), 1);
        assert!(registry.contains("notification-1"));
        assert!(!registry.is_installed("event-1"));
        assert!(registry.is_installed("notification-1"));
    }

    #[test]
    fn test_resolve_prefers_subscription_header() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(sub("a", "/user/event/1"), true);
        registry.subscribe(sub("b", "/topic/hospital/admit-request/"), true);

        assert_eq!(
            registry.resolve(Some("a"), Some("/topic/hospital/admit-request/")).unwrap().topic_id.as_str(),
            "a"
        );
        assert_eq!(
            registry.resolve(None, Some("/topic/hospital/admit-request")).unwrap().topic_id.as_str(),
            "b"
        );
        assert_eq!(
            registry.resolve(Some("unknown"), Some("/user/event/1")).unwrap().topic_id.as_str(),
            "a"
        );
        assert!(registry.resolve(None, Some("/user/event/9")).is_none());
    }
}
