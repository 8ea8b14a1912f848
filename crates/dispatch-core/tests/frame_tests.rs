//! Frame encoding tests for dispatch core

use bytes::Bytes;
use dispatch_core::{Command, Frame, FrameReader, Heartbeat, Inbound};

fn read_all(data: &[u8]) -> Vec<Inbound> {
    let mut reader = FrameReader::new();
    reader.push(data);
    let mut out = Vec::new();
    while let Some(item) = reader.next().expect("read failed") {
        out.push(item);
    }
    out
}

#[test]
fn test_subscribe_frame() {
    let frame = Frame::subscribe("event-42", "/user/event/42");
    let decoded = Frame::decode(&frame.encode()).expect("decode failed");

    assert_eq!(decoded.command, Command::Subscribe);
    assert_eq!(decoded.header("id"), Some("event-42"));
    assert_eq!(decoded.header("destination"), Some("/user/event/42"));
    assert!(decoded.body.is_empty());
}

#[test]
fn test_connected_frame_from_server() {
    let raw = b"CONNECTED\nversion:1.2\nheart-beat:0,0\nuser-name:+923001234567\n\n\0";
    let frame = Frame::decode(raw).expect("decode failed");

    assert_eq!(frame.command, Command::Connected);
    assert_eq!(frame.header("version"), Some("1.2"));
    assert_eq!(
        frame.header("heart-beat").map(|h| h.parse::<Heartbeat>().unwrap()),
        Some(Heartbeat::DISABLED)
    );
    // CONNECTED values are not unescaped
    assert_eq!(frame.header("user-name"), Some("+923001234567"));
}

#[test]
fn test_crlf_line_endings() {
    let raw = b"MESSAGE\r\ndestination:/user/event/1\r\nsubscription:event-1\r\n\r\n{}\0";
    let frame = Frame::decode(raw).expect("decode failed");
    assert_eq!(frame.header("subscription"), Some("event-1"));
    assert_eq!(frame.body.as_ref(), b"{}");
}

#[test]
fn test_repeated_header_first_wins() {
    let raw = b"MESSAGE\nfoo:World\nfoo:Hello\n\n\0";
    let frame = Frame::decode(raw).expect("decode failed");
    assert_eq!(frame.header("foo"), Some("World"));
    assert_eq!(frame.headers.len(), 2);
}

#[test]
fn test_several_frames_in_one_message() {
    let mut data = Vec::new();
    data.extend_from_slice(&Frame::message("/topic/a/", "a", "1", "[]").encode());
    data.push(b'\n');
    data.extend_from_slice(&Frame::message("/topic/b/", "b", "2", "{}").encode());

    let items = read_all(&data);
    assert_eq!(items.len(), 3);
    assert!(matches!(&items[0], Inbound::Frame(f) if f.header("subscription") == Some("a")));
    assert_eq!(items[1], Inbound::Heartbeat);
    assert!(matches!(&items[2], Inbound::Frame(f) if f.header("subscription") == Some("b")));
}

#[test]
fn test_body_without_content_length_reads_to_nul() {
    let raw = b"ERROR\nmessage:bad token\n\nInvalid JWT\0";
    let frame = Frame::decode(raw).expect("decode failed");
    assert_eq!(frame.command, Command::Error);
    assert_eq!(frame.header("message"), Some("bad token"));
    assert_eq!(frame.body, Bytes::from_static(b"Invalid JWT"));
}

#[test]
fn test_invalid_escape_rejected() {
    let raw = b"MESSAGE\nfoo:bad\\tescape\n\n\0";
    assert!(Frame::decode(raw).is_err());
}

#[test]
fn test_header_without_colon_rejected() {
    let raw = b"MESSAGE\nnocolon\n\n\0";
    assert!(Frame::decode(raw).is_err());
}

#[test]
fn test_content_length_mismatch_rejected() {
    let raw = b"MESSAGE\ncontent-length:2\n\nabc\0";
    assert!(Frame::decode(raw).is_err());
}

#[test]
fn test_byte_by_byte_feed() {
    let encoded = Frame::send("/app/live-location/event/9", r#"{"latitude":1.5,"longitude":2.5}"#).encode();
    let mut reader = FrameReader::new();
    let mut frames = Vec::new();
    for byte in encoded.iter() {
        reader.push(std::slice::from_ref(byte));
        if let Some(Inbound::Frame(frame)) = reader.next().expect("read failed") {
            frames.push(frame);
        }
    }
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header("destination"), Some("/app/live-location/event/9"));
}
