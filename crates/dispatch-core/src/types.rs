//! Payload records exchanged with the dispatch backend
//!
//! All bodies are UTF-8 JSON with camelCase field names.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Backend identifiers arrive as JSON numbers or strings depending on the entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Number(i64),
    Text(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Number(n) => write!(f, "{}", n),
            EntityId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        EntityId::Number(n)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId::Text(s.to_string())
    }
}

/// Timestamps are passed through as sent: ISO-8601 text or epoch milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    EpochMillis(i64),
    Text(String),
}

/// A WGS84 position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Build a point, rejecting out-of-range or non-finite coordinates
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let point = Self {
            latitude,
            longitude,
        };
        point.validate()?;
        Ok(point)
    }

    /// Latitude in [-90, 90], longitude in [-180, 180], both inclusive
    pub fn validate(&self) -> Result<()> {
        check_range("latitude", self.latitude, 90)?;
        check_range("longitude", self.longitude, 180)
    }
}

fn check_range(field: &'static str, value: f64, limit: u16) -> Result<()> {
    let bound = f64::from(limit);
    if value.is_finite() && (-bound..=bound).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidCoordinate {
            field,
            value,
            limit,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub first_name: String,
    pub last_name: String,
}

impl PatientSummary {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// An emergency event as pushed on `/user/event/{eventId}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: EntityId,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<PatientSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<TimeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<TimeValue>,
}

/// A user notification pushed on `/user/notification/{userId}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub notification_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<TimeValue>,
}

/// An incident in the ambulance provider's active list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRecord {
    pub id: EntityId,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<PatientSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<TimeValue>,
}

/// The active-incident channel publishes either a single record or the full list
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum IncidentPayload {
    Many(Vec<IncidentRecord>),
    One(IncidentRecord),
}

/// Decode an active-incident body into a list
pub fn decode_incidents(body: &[u8]) -> Result<Vec<IncidentRecord>> {
    let payload: IncidentPayload =
        serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))?;
    Ok(match payload {
        IncidentPayload::Many(list) => list,
        IncidentPayload::One(record) => vec![record],
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HospitalSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HospitalAssignment {
    pub hospital: HospitalSummary,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<TimeValue>,
}

/// A request for a hospital to admit the patient of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmitRequestRecord {
    pub event: EventRecord,
    pub event_hospital_assignment: HospitalAssignment,
}

/// Body of `/app/join/event/{eventId}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub event_id: String,
    pub user_id: String,
}

/// Decode a JSON body into `T`, mapping failures to [`Error::Decode`]
pub fn decode_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))
}

/// Serialize a payload to a JSON body
pub fn encode_json<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|e| Error::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_bounds() {
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(-90.0, 0.0).is_ok());
        assert!(GeoPoint::new(0.0, 180.0).is_ok());
        assert!(GeoPoint::new(0.0, 180.0001).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
        assert!(GeoPoint::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_coordinate_error_names_field() {
        match GeoPoint::new(10.0, -181.0) {
            Err(Error::InvalidCoordinate { field, limit, .. }) => {
                assert_eq!(field, "longitude");
                assert_eq!(limit, 180);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_event_minimal() {
        let event: EventRecord = decode_json(br#"{"id":42,"status":"EN_ROUTE"}"#).unwrap();
        assert_eq!(event.id, EntityId::Number(42));
        assert_eq!(event.status, "EN_ROUTE");
        assert!(event.patient.is_none());
    }

    #[test]
    fn test_event_missing_status_is_decode_error() {
        let err = decode_json::<EventRecord>(br#"{"id":42}"#).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_incidents_single_or_list() {
        let one = decode_incidents(br#"{"id":"a","status":"OPEN"}"#).unwrap();
        assert_eq!(one.len(), 1);
        let many =
            decode_incidents(br#"[{"id":1,"status":"OPEN"},{"id":2,"status":"CLOSED"}]"#).unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].id, EntityId::Number(2));
    }

    #[test]
    fn test_join_request_shape() {
        let body = encode_json(&JoinRequest {
            event_id: "7".to_string(),
            user_id: "1912177586428452864".to_string(),
        })
        .unwrap();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            r#"{"eventId":"7","userId":"1912177586428452864"}"#
        );
    }
}
