//! Outbound messages
//!
//! Messages are validated when built, so an invalid coordinate or id fails
//! before the session is consulted and nothing reaches the wire.

use bytes::Bytes;
use dispatch_core::{encode_json, Destination, Frame, GeoPoint, JoinRequest};
use serde::Serialize;

use crate::error::{ClientError, Result};

/// A SEND ready to be published
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub destination: Destination,
    pub body: Bytes,
}

impl OutboundMessage {
    pub fn new(destination: Destination, body: impl Into<Bytes>) -> Self {
        Self {
            destination,
            body: body.into(),
        }
    }

    /// Serialize `payload` as the JSON body
    pub fn json<T: Serialize + ?Sized>(destination: Destination, payload: &T) -> Result<Self> {
        Ok(Self::new(destination, encode_json(payload)?))
    }

    /// `{eventId, userId}` to `/app/join/event/{eventId}`
    pub fn join_event(event_id: &str, user_id: &str) -> Result<Self> {
        require("event_id", event_id)?;
        require("user_id", user_id)?;
        Self::json(
            Destination::join_event(event_id)?,
            &JoinRequest {
                event_id: event_id.to_string(),
                user_id: user_id.to_string(),
            },
        )
    }

    /// `{latitude, longitude}` to `/app/live-location/event/{eventId}`
    pub fn location_update(event_id: &str, latitude: f64, longitude: f64) -> Result<Self> {
        let point = GeoPoint::new(latitude, longitude)?;
        require("event_id", event_id)?;
        Self::json(Destination::publish_live_location(event_id)?, &point)
    }

    pub fn to_frame(&self) -> Frame {
        Frame::send(self.destination.as_str(), self.body.clone())
    }
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ClientError::InvalidArgument(format!("{} must not be empty", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::Command;

    #[test]
    fn test_location_update() {
        let message = OutboundMessage::location_update("42", 31.5, 74.25).unwrap();
        assert_eq!(message.destination.as_str(), "/app/live-location/event/42");

        let frame = message.to_frame();
        assert_eq!(frame.command, Command::Send);
        assert_eq!(frame.header("content-type"), Some("application/json"));
        assert_eq!(frame.body_str().unwrap(), r#"{"latitude":31.5,"longitude":74.25}"#);
    }

    #[test]
    fn test_coordinates_checked_first() {
        // Bad coordinates win over a bad event id
        let err = OutboundMessage::location_update("", 91.0, 0.0).unwrap_err();
        assert!(matches!(err, ClientError::InvalidCoordinate { field: "latitude", .. }));
    }

    #[test]
    fn test_coordinate_edges() {
        assert!(OutboundMessage::location_update("1", -90.0, 180.0).is_ok());
        assert!(OutboundMessage::location_update("1", 90.0, -180.0).is_ok());
        assert!(matches!(
            OutboundMessage::location_update("1", 0.0, 180.0001),
            Err(ClientError::InvalidCoordinate { field: "longitude", .. })
        ));
    }

    #[test]
    fn test_join_event() {
        let message = OutboundMessage::join_event("42", "u-1").unwrap();
        assert_eq!(message.destination.as_str(), "/app/join/event/42");
        assert_eq!(&message.body[..], br#"{"eventId":"42","userId":"u-1"}"#);

        assert!(matches!(
            OutboundMessage::join_event("42", ""),
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            OutboundMessage::join_event("a/b", "u"),
            Err(ClientError::InvalidDestination(_))
        ));
    }
}
