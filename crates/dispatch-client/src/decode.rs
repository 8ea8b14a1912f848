//! Per-topic payload decoders

use std::fmt;
use std::sync::Arc;

use dispatch_core::{decode_incidents, decode_json, GeoPoint, Result};

use crate::event::Payload;

/// Turns a frame body into a typed payload or a decode error
pub type Decoder = Arc<dyn Fn(&[u8]) -> Result<Payload> + Send + Sync>;

/// The payload shapes the platform publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    EventUpdate,
    LiveLocationUpdate,
    Notification,
    ActiveIncidentList,
    AdmitRequest,
}

impl PayloadKind {
    pub fn decode(self, body: &[u8]) -> Result<Payload> {
        let payload = match self {
            PayloadKind::EventUpdate => Payload::EventUpdate(decode_json(body)?),
            PayloadKind::LiveLocationUpdate => {
                let point: GeoPoint = decode_json(body)?;
                point
                    .validate()
                    .map_err(|e| dispatch_core::Error::Decode(e.to_string()))?;
                Payload::LiveLocationUpdate(point)
            }
            PayloadKind::Notification => Payload::Notification(decode_json(body)?),
            PayloadKind::ActiveIncidentList => Payload::ActiveIncidentList(decode_incidents(body)?),
            PayloadKind::AdmitRequest => Payload::AdmitRequest(decode_json(body)?),
        };
        Ok(payload)
    }

    pub fn decoder(self) -> Decoder {
        Arc::new(move |body| self.decode(body))
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PayloadKind::EventUpdate => "event",
            PayloadKind::LiveLocationUpdate => "live-location",
            PayloadKind::Notification => "notification",
            PayloadKind::ActiveIncidentList => "active-incidents",
            PayloadKind::AdmitRequest => "admit-request",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_location_out_of_range_is_decode_error() {
        let result = PayloadKind::LiveLocationUpdate.decode(br#"{"latitude":95,"longitude":0}"#);
        assert!(matches!(result, Err(dispatch_core::Error::Decode(_))));
    }

    #[test]
    fn test_kind_matches_payload() {
        let payload = PayloadKind::EventUpdate
            .decode(br#"{"id":42,"status":"EN_ROUTE"}"#)
            .unwrap();
        assert_eq!(payload.kind(), PayloadKind::EventUpdate);
    }

    #[test]
    fn test_not_json() {
        assert!(PayloadKind::Notification.decode(b"<html>").is_err());
    }
}
