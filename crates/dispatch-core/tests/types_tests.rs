//! Payload decoding tests for dispatch core

use dispatch_core::{
    decode_incidents, decode_json, AdmitRequestRecord, EntityId, Error, EventRecord, GeoPoint,
    Notification, TimeValue,
};

#[test]
fn test_full_event_record() {
    let body = br#"{
        "id": 7,
        "status": "ASSIGNED",
        "liveLocation": {"latitude": 31.52, "longitude": 74.35},
        "patient": {"firstName": "Ayesha", "lastName": "Khan"},
        "pickupAddress": "Mall Road, Lahore",
        "pickupLocation": {"latitude": 31.55, "longitude": 74.33},
        "createdAt": "2025-04-14T10:00:00",
        "updatedAt": 1744624800000
    }"#;

    let event: EventRecord = decode_json(body).expect("decode failed");
    assert_eq!(event.id, EntityId::Number(7));
    assert_eq!(
        event.live_location,
        Some(GeoPoint {
            latitude: 31.52,
            longitude: 74.35
        })
    );
    assert_eq!(event.patient.as_ref().map(|p| p.full_name()), Some("Ayesha Khan".to_string()));
    assert_eq!(event.created_at, Some(TimeValue::Text("2025-04-14T10:00:00".to_string())));
    assert_eq!(event.updated_at, Some(TimeValue::EpochMillis(1744624800000)));
}

#[test]
fn test_notification() {
    let body = br#"{"notificationType":"EVENT_CREATED","receiverId":"1912177586428452864","receiverType":"PATIENT","createdAt":"2025-04-14T10:00:00"}"#;
    let n: Notification = decode_json(body).expect("decode failed");
    assert_eq!(n.notification_type, "EVENT_CREATED");
    assert_eq!(n.receiver_id, Some(EntityId::Text("1912177586428452864".to_string())));
    assert!(n.timestamp.is_none());
}

#[test]
fn test_notification_without_type_rejected() {
    assert!(matches!(
        decode_json::<Notification>(br#"{"receiverId":1}"#),
        Err(Error::Decode(_))
    ));
}

#[test]
fn test_admit_request() {
    let body = br#"{
        "event": {"id": 3, "status": "TRANSPORTING"},
        "eventHospitalAssignment": {"hospital": {"id": 11, "name": "Mayo"}, "status": "PENDING"}
    }"#;
    let req: AdmitRequestRecord = decode_json(body).expect("decode failed");
    assert_eq!(req.event.id, EntityId::Number(3));
    assert_eq!(req.event_hospital_assignment.status, "PENDING");
    assert_eq!(req.event_hospital_assignment.hospital.name.as_deref(), Some("Mayo"));
}

#[test]
fn test_incidents_reject_garbage() {
    assert!(decode_incidents(b"not json").is_err());
    assert!(decode_incidents(br#"[{"id":1}]"#).is_err());
    assert!(decode_incidents(b"[]").expect("empty list").is_empty());
}
