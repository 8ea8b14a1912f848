//! Inbound MESSAGE routing
//!
//! Each MESSAGE is resolved to a subscription, decoded with that
//! subscription's decoder and handed to its handler. A bad body or a
//! panicking handler affects only that one frame.

use std::panic::{catch_unwind, AssertUnwindSafe};

use dispatch_core::{Frame, TopicId};
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::event::ApplicationEvent;
use crate::registry::SubscriptionRegistry;

/// What happened to one MESSAGE
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered {
        topic_id: TopicId,
    },
    /// No subscription matched
    Unrouted {
        destination: Option<String>,
    },
    DecodeFailed {
        topic_id: TopicId,
        destination: String,
        reason: String,
    },
    HandlerPanicked {
        topic_id: TopicId,
    },
}

/// Resolve, decode and deliver one MESSAGE frame
pub fn route(registry: &SubscriptionRegistry, frame: &Frame) -> RouteOutcome {
    let destination = frame.header("destination");
    let Some(subscription) = registry.resolve(frame.header("subscription"), destination) else {
        debug!("No subscription for MESSAGE on {:?}", destination);
        return RouteOutcome::Unrouted {
            destination: destination.map(str::to_string),
        };
    };

    let topic_id = subscription.topic_id.clone();
    let destination = destination
        .unwrap_or(subscription.destination.as_str())
        .to_string();

    let payload = match subscription.decode(&frame.body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Dropping undecodable message: {}", e);
            let reason = match e {
                ClientError::Decode { reason, .. } => reason,
                other => other.to_string(),
            };
            return RouteOutcome::DecodeFailed {
                topic_id,
                destination,
                reason,
            };
        }
    };

    let event = ApplicationEvent {
        topic_id: topic_id.clone(),
        destination,
        payload,
    };

    match catch_unwind(AssertUnwindSafe(|| subscription.deliver(event))) {
        Ok(()) => RouteOutcome::Delivered { topic_id },
        Err(_) => {
            warn!("Handler for {} panicked", topic_id);
            RouteOutcome::HandlerPanicked { topic_id }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::PayloadKind;
    use crate::event::Payload;
    use crate::registry::Subscription;
    use dispatch_core::Destination;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn registry_with(seen: Arc<Mutex<Vec<ApplicationEvent>>>) -> SubscriptionRegistry {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(
            Subscription::of_kind(
                TopicId::event("42"),
                Destination::event("42").unwrap(),
                PayloadKind::EventUpdate,
                move |event| seen.lock().push(event),
            ),
            true,
        );
        registry
    }

    fn message(body: &str) -> Frame {
        Frame::message("/user/event/42", "event-42", "m-1", body.to_string())
    }

    #[test]
    fn test_delivers_decoded_payload() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(seen.clone());

        let outcome = route(&registry, &message(r#"{"id":42,"status":"EN_ROUTE"}"#));
        assert_eq!(
            outcome,
            RouteOutcome::Delivered {
                topic_id: TopicId::event("42")
            }
        );

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        match &seen[0].payload {
            Payload::EventUpdate(record) => assert_eq!(record.status, "EN_ROUTE"),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_decode_failure_is_isolated() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(seen.clone());

        let bad = route(&registry, &message("not json"));
        match bad {
            RouteOutcome::DecodeFailed {
                topic_id,
                destination,
                reason,
            } => {
                assert_eq!(topic_id, TopicId::event("42"));
                assert_eq!(destination, "/user/event/42");
                assert!(!reason.is_empty());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let good = route(&registry, &message(r#"{"id":42,"status":"ARRIVED"}"#));
        assert!(matches!(good, RouteOutcome::Delivered { .. }));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_unrouted() {
        let registry = SubscriptionRegistry::new();
        let outcome = route(&registry, &message("{}"));
        assert_eq!(
            outcome,
            RouteOutcome::Unrouted {
                destination: Some("/user/event/42".to_string())
            }
        );
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(
            Subscription::of_kind(
                TopicId::event("42"),
                Destination::event("42").unwrap(),
                PayloadKind::EventUpdate,
                |_| panic!("handler bug"),
            ),
            true,
        );

        let outcome = route(&registry, &message(r#"{"id":42,"status":"EN_ROUTE"}"#));
        assert!(matches!(outcome, RouteOutcome::HandlerPanicked { .. }));
    }
}
