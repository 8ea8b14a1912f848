//! Destination parsing and the platform's addressing scheme
//!
//! Destinations are hierarchical, slash-separated strings:
//! ```text
//! /user/notification/{userId}
//! /user/event/{eventId}
//! /user/event/live-location/{eventId}
//! /topic/ambulance-provider/active-incident/
//! /topic/hospital/admit-request/
//! /app/join/event/{eventId}
//! /app/live-location/event/{eventId}
//! ```
//!
//! `/user/...` destinations are identity-scoped (the broker resolves them per
//! session), `/topic/...` destinations are broadcast, and `/app/...`
//! destinations are application endpoints that accept SEND frames.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Broadcast channel listing the active incidents of an ambulance provider
pub const ACTIVE_INCIDENTS: &str = "/topic/ambulance-provider/active-incident/";

/// Broadcast channel carrying hospital admit requests
pub const ADMIT_REQUESTS: &str = "/topic/hospital/admit-request/";

/// Topic id of the active-incident subscription
pub const ACTIVE_INCIDENTS_TOPIC: &str = "active-incidents";

/// Topic id of the admit-request subscription
pub const ADMIT_REQUESTS_TOPIC: &str = "admit-requests";

/// A validated destination
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Destination(String);

impl Destination {
    /// Parse a destination string
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidDestination("empty destination".to_string()));
        }

        if !s.starts_with('/') {
            return Err(Error::InvalidDestination(format!(
                "destination must start with '/': {}",
                s
            )));
        }

        if s.chars().any(|c| c == '\0' || c.is_control()) {
            return Err(Error::InvalidDestination(format!(
                "control character in destination: {:?}",
                s
            )));
        }

        // A trailing slash is allowed (broadcast topics use one), inner empty segments are not
        let inner = s[1..].strip_suffix('/').unwrap_or(&s[1..]);
        if inner.is_empty() || inner.split('/').any(str::is_empty) {
            return Err(Error::InvalidDestination(format!(
                "empty segment in destination: {}",
                s
            )));
        }

        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Segments, ignoring a trailing slash
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0[1..].trim_end_matches('/').split('/')
    }

    /// First segment (`user`, `topic`, `app`)
    pub fn prefix(&self) -> Option<&str> {
        self.segments().next()
    }

    /// Identity-scoped destinations are resolved per user by the broker
    pub fn is_user_scoped(&self) -> bool {
        self.prefix() == Some("user")
    }

    /// Broadcast destinations are shared by every connected identity
    pub fn is_broadcast(&self) -> bool {
        self.prefix() == Some("topic")
    }

    /// Two destinations are the same channel when they differ at most by a trailing slash
    pub fn same_channel(&self, other: &str) -> bool {
        self.0.trim_end_matches('/') == other.trim_end_matches('/')
    }

    pub fn notification(user_id: &str) -> Result<Self> {
        Self::with_id("/user/notification", user_id)
    }

    pub fn event(event_id: &str) -> Result<Self> {
        Self::with_id("/user/event", event_id)
    }

    pub fn live_location(event_id: &str) -> Result<Self> {
        Self::with_id("/user/event/live-location", event_id)
    }

    pub fn active_incidents() -> Self {
        Self(ACTIVE_INCIDENTS.to_string())
    }

    pub fn admit_requests() -> Self {
        Self(ADMIT_REQUESTS.to_string())
    }

    /// Endpoint accepting `{eventId, userId}` join requests
    pub fn join_event(event_id: &str) -> Result<Self> {
        Self::with_id("/app/join/event", event_id)
    }

    /// Endpoint accepting `{latitude, longitude}` updates for an event
    pub fn publish_live_location(event_id: &str) -> Result<Self> {
        Self::with_id("/app/live-location/event", event_id)
    }

    fn with_id(base: &str, id: &str) -> Result<Self> {
        if id.is_empty() || id.contains('/') {
            return Err(Error::InvalidDestination(format!(
                "invalid id segment {:?} for {}",
                id, base
            )));
        }
        Self::parse(&format!("{}/{}", base, id))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Destination {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Destination> for String {
    fn from(d: Destination) -> Self {
        d.0
    }
}

impl std::str::FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Local identifier correlating a logical subscription with its destination
/// and handler. Used verbatim as the STOMP subscription id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicId(String);

impl TopicId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn notification(user_id: &str) -> Self {
        Self(format!("notification-{}", user_id))
    }

    pub fn event(event_id: &str) -> Self {
        Self(format!("event-{}", event_id))
    }

    pub fn live_location(event_id: &str) -> Self {
        Self(format!("live-location-{}", event_id))
    }

    pub fn active_incidents() -> Self {
        Self(ACTIVE_INCIDENTS_TOPIC.to_string())
    }

    pub fn admit_requests() -> Self {
        Self(ADMIT_REQUESTS_TOPIC.to_string())
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TopicId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TopicId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::borrow::Borrow<str> for TopicId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let d = Destination::parse("/user/event/42").unwrap();
        assert_eq!(d.segments().collect::<Vec<_>>(), vec!["user", "event", "42"]);
        assert!(d.is_user_scoped());
        assert!(!d.is_broadcast());
    }

    #[test]
    fn test_trailing_slash_broadcast() {
        let d = Destination::active_incidents();
        assert!(Destination::parse(ACTIVE_INCIDENTS).is_ok());
        assert!(d.is_broadcast());
        assert!(d.same_channel("/topic/ambulance-provider/active-incident"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Destination::parse("").is_err());
        assert!(Destination::parse("user/event").is_err());
        assert!(Destination::parse("/").is_err());
        assert!(Destination::parse("/user//event").is_err());
        assert!(Destination::parse("/user/event\n").is_err());
    }

    #[test]
    fn test_scheme() {
        assert_eq!(Destination::event("42").unwrap().as_str(), "/user/event/42");
        assert_eq!(
            Destination::live_location("42").unwrap().as_str(),
            "/user/event/live-location/42"
        );
        assert_eq!(
            Destination::publish_live_location("42").unwrap().as_str(),
            "/app/live-location/event/42"
        );
        assert!(Destination::join_event("").is_err());
        assert!(Destination::join_event("4/2").is_err());
        assert_eq!(TopicId::event("42").as_str(), "event-42");
    }
}
