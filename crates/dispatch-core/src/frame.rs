//! STOMP 1.2 frame encoding/decoding
//!
//! Frame format:
//! ```text
//! COMMAND EOL
//! header1:value1 EOL
//! header2:value2 EOL
//! EOL
//! body NUL
//! ```
//!
//! `EOL` is `\n` or `\r\n`. A bare `EOL` between frames is a heart-beat.
//! Header values are escaped (`\\`, `\n`, `\r`, `\c`) on every frame except
//! CONNECT and CONNECTED. When `content-length` is present the body is read
//! by length, otherwise up to the first NUL.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Heartbeat, Result, STOMP_VERSION};

/// Default maximum size of a single buffered frame
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// STOMP frame commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // client frames
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // server frames
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED carry raw header values for 1.0 compatibility
    pub fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let command = match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(Error::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Frame {
    /// Create an empty frame
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Append a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header. When repeated, the first occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Body as UTF-8
    pub fn body_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|e| Error::Decode(format!("body is not valid UTF-8: {}", e)))
    }

    /// CONNECT frame for the given virtual host and heart-beat offer
    pub fn connect(host: &str, heartbeat: Heartbeat) -> Self {
        Frame::new(Command::Connect)
            .with_header("accept-version", STOMP_VERSION)
            .with_header("host", host)
            .with_header("heart-beat", heartbeat.to_string())
    }

    /// SUBSCRIBE frame; the id is echoed back in MESSAGE `subscription` headers
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).with_header("id", id)
    }

    /// SEND frame with a JSON body
    pub fn send(destination: &str, body: impl Into<Bytes>) -> Self {
        Frame::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", crate::JSON_CONTENT_TYPE)
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    /// Server-side MESSAGE frame
    pub fn message(destination: &str, subscription: &str, message_id: &str, body: impl Into<Bytes>) -> Self {
        Frame::new(Command::Message)
            .with_header("destination", destination)
            .with_header("subscription", subscription)
            .with_header("message-id", message_id)
            .with_header("content-type", crate::JSON_CONTENT_TYPE)
            .with_body(body)
    }

    /// Server-side ERROR frame
    pub fn error(message: &str) -> Self {
        Frame::new(Command::Error).with_header("message", message)
    }

    /// Calculate the encoded size (excluding escape expansion)
    pub fn size(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|(n, v)| n.len() + v.len() + 2)
            .sum();
        self.command.as_str().len() + 1 + headers + 24 + 1 + self.body.len() + 1
    }

    /// Encode frame to bytes. A `content-length` header is added when the
    /// body is non-empty and none was set explicitly.
    pub fn encode(&self) -> Bytes {
        let escape = self.command.escapes_headers();
        let mut buf = BytesMut::with_capacity(self.size());

        buf.put_slice(self.command.as_str().as_bytes());
        buf.put_u8(b'\n');

        for (name, value) in &self.headers {
            put_header_part(&mut buf, name, escape);
            buf.put_u8(b':');
            put_header_part(&mut buf, value, escape);
            buf.put_u8(b'\n');
        }

        if !self.body.is_empty() && self.header("content-length").is_none() {
            buf.put_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }

        buf.put_u8(b'\n');
        buf.put_slice(&self.body);
        buf.put_u8(0);
        buf.freeze()
    }

    /// Decode exactly one frame from a complete buffer
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = FrameReader::new();
        reader.push(data);
        loop {
            match reader.next()? {
                Some(Inbound::Frame(frame)) => return Ok(frame),
                Some(Inbound::Heartbeat) => continue,
                None => return Err(Error::InvalidFrame("incomplete frame".to_string())),
            }
        }
    }
}

fn put_header_part(buf: &mut BytesMut, part: &str, escape: bool) {
    if !escape {
        buf.put_slice(part.as_bytes());
        return;
    }
    for c in part.chars() {
        match c {
            '\\' => buf.put_slice(b"\\\\"),
            '\n' => buf.put_slice(b"\\n"),
            '\r' => buf.put_slice(b"\\r"),
            ':' => buf.put_slice(b"\\c"),
            _ => {
                let mut tmp = [0u8; 4];
                buf.put_slice(c.encode_utf8(&mut tmp).as_bytes());
            }
        }
    }
}

fn unescape(name: &str, raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(Error::InvalidHeader {
                    name: name.to_string(),
                    reason: format!("undefined escape sequence \\{}", other.map(String::from).unwrap_or_default()),
                })
            }
        }
    }
    Ok(out)
}

/// One unit read off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(Frame),
    Heartbeat,
}

/// Incremental frame reader. Transport messages may carry several frames,
/// a partial frame, or heart-beat EOLs; push bytes in and pull frames out.
#[derive(Debug)]
pub struct FrameReader {
    buf: BytesMut,
    max_frame_size: usize,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet consumed
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pull the next frame or heart-beat. `Ok(None)` means more bytes are needed.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Inbound>> {
        if self.buf.starts_with(b"\r\n") {
            self.buf.advance(2);
            return Ok(Some(Inbound::Heartbeat));
        }
        if self.buf.starts_with(b"\n") {
            self.buf.advance(1);
            return Ok(Some(Inbound::Heartbeat));
        }
        if self.buf.is_empty() {
            return Ok(None);
        }

        let Some(parsed) = self.parse_head()? else {
            self.check_size()?;
            return Ok(None);
        };

        let body_start = parsed.body_start;
        let (body_end, frame_end) = match parsed.content_length {
            Some(len) => {
                if len > self.max_frame_size {
                    return Err(Error::FrameTooLarge(len, self.max_frame_size));
                }
                let end = body_start + len;
                if self.buf.len() <= end {
                    return Ok(None);
                }
                if self.buf[end] != 0 {
                    return Err(Error::InvalidFrame(
                        "body not terminated by NUL after content-length bytes".to_string(),
                    ));
                }
                (end, end + 1)
            }
            None => match self.buf[body_start..].iter().position(|b| *b == 0) {
                Some(pos) => (body_start + pos, body_start + pos + 1),
                None => {
                    self.check_size()?;
                    return Ok(None);
                }
            },
        };

        let mut raw = self.buf.split_to(frame_end);
        raw.truncate(body_end);
        let body = raw.split_off(body_start).freeze();

        Ok(Some(Inbound::Frame(Frame {
            command: parsed.command,
            headers: parsed.headers,
            body,
        })))
    }

    fn check_size(&self) -> Result<()> {
        if self.buf.len() > self.max_frame_size {
            return Err(Error::FrameTooLarge(self.buf.len(), self.max_frame_size));
        }
        Ok(())
    }

    fn parse_head(&self) -> Result<Option<Head>> {
        let mut pos = 0;
        let mut command = None;
        let mut headers = Vec::new();
        let mut content_length = None;

        loop {
            let Some(nl) = self.buf[pos..].iter().position(|b| *b == b'\n') else {
                return Ok(None);
            };
            let mut line = &self.buf[pos..pos + nl];
            pos += nl + 1;
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            let line = std::str::from_utf8(line)
                .map_err(|_| Error::InvalidFrame("frame head is not valid UTF-8".to_string()))?;

            let Some(cmd) = command else {
                command = Some(line.parse::<Command>()?);
                continue;
            };

            if line.is_empty() {
                return Ok(Some(Head {
                    command: cmd,
                    headers,
                    content_length,
                    body_start: pos,
                }));
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::InvalidFrame(format!("malformed header line: {}", line)))?;
            let (name, value) = if cmd.escapes_headers() {
                (unescape(name, name)?, unescape(name, value)?)
            } else {
                (name.to_string(), value.to_string())
            };

            if name == "content-length" && content_length.is_none() {
                let len = value.trim().parse::<usize>().map_err(|_| Error::InvalidHeader {
                    name: name.clone(),
                    reason: format!("not a length: {}", value),
                })?;
                content_length = Some(len);
            }
            headers.push((name, value));
        }
    }
}

struct Head {
    command: Command,
    headers: Vec<(String, String)>,
    content_length: Option<usize>,
    body_start: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_adds_content_length() {
        let frame = Frame::send("/app/join/event/7", r#"{"eventId":"7"}"#);
        let encoded = frame.encode();
        let text = std::str::from_utf8(&encoded).unwrap();

        assert!(text.starts_with("SEND\n"));
        assert!(text.contains("destination:/app/join/event/7\n"));
        assert!(text.contains("content-length:15\n"));
        assert!(text.ends_with("{\"eventId\":\"7\"}\0"));
    }

    #[test]
    fn test_header_escaping() {
        let frame = Frame::new(Command::Message).with_header("note", "a:b\nc\\d");
        let encoded = frame.encode();
        assert!(std::str::from_utf8(&encoded)
            .unwrap()
            .contains("note:a\\cb\\nc\\\\d\n"));

        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded.header("note"), Some("a:b\nc\\d"));
    }

    #[test]
    fn test_connect_headers_not_escaped() {
        let frame = Frame::connect("dispatch", Heartbeat::new(4000, 4000));
        let encoded = frame.encode();
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.contains("heart-beat:4000,4000\n"));
        assert!(text.contains("accept-version:1.2\n"));
    }

    #[test]
    fn test_reader_partial_then_complete() {
        let encoded = Frame::message("/user/event/42", "event-42", "m-1", r#"{"id":42}"#).encode();
        let (a, b) = encoded.split_at(10);

        let mut reader = FrameReader::new();
        reader.push(a);
        assert_eq!(reader.next().unwrap(), None);
        reader.push(b);

        match reader.next().unwrap() {
            Some(Inbound::Frame(frame)) => {
                assert_eq!(frame.command, Command::Message);
                assert_eq!(frame.header("subscription"), Some("event-42"));
                assert_eq!(frame.body.as_ref(), br#"{"id":42}"#);
            }
            other => panic!("expected frame, got {:?}", other),
        }
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_reader_heartbeats_between_frames() {
        let mut reader = FrameReader::new();
        reader.push(b"\n\r\nRECEIPT\nreceipt-id:1\n\n\0\n");

        assert_eq!(reader.next().unwrap(), Some(Inbound::Heartbeat));
        assert_eq!(reader.next().unwrap(), Some(Inbound::Heartbeat));
        assert!(matches!(reader.next().unwrap(), Some(Inbound::Frame(f)) if f.command == Command::Receipt));
        assert_eq!(reader.next().unwrap(), Some(Inbound::Heartbeat));
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn test_content_length_allows_nul_in_body() {
        let frame = Frame::new(Command::Message).with_body(&b"a\0b"[..]);
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.body.as_ref(), b"a\0b");
    }

    #[test]
    fn test_unknown_command() {
        let err = Frame::decode(b"HELLO\n\n\0").unwrap_err();
        assert!(matches!(err, Error::UnknownCommand(c) if c == "HELLO"));
    }

    #[test]
    fn test_frame_too_large() {
        let mut reader = FrameReader::with_max_frame_size(16);
        reader.push(b"MESSAGE\ndestination:/topic/x\n\nxxxxxxxxxxxxxxxxxxxxxxxx");
        assert!(matches!(reader.next(), Err(Error::FrameTooLarge(_, 16))));
    }
}
