//! STOMP heart-beat negotiation
//!
//! Each side announces `heart-beat:<cx>,<cy>`: the smallest interval at which
//! it can send, and the interval at which it wants to receive. A value of 0
//! means "cannot" / "does not want".

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};

/// Grace factor applied to the negotiated incoming interval before a silent
/// peer is considered gone
pub const INCOMING_TOLERANCE: u32 = 2;

/// A heart-beat header value, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl Heartbeat {
    pub const DISABLED: Heartbeat = Heartbeat {
        outgoing_ms: 0,
        incoming_ms: 0,
    };

    pub fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    /// Combine the client's offer with the server's CONNECTED header.
    /// The result is what the client must actually do.
    pub fn negotiate(client: Heartbeat, server: Heartbeat) -> Heartbeat {
        let pick = |ours: u64, theirs: u64| {
            if ours == 0 || theirs == 0 {
                0
            } else {
                ours.max(theirs)
            }
        };
        Heartbeat {
            outgoing_ms: pick(client.outgoing_ms, server.incoming_ms),
            incoming_ms: pick(client.incoming_ms, server.outgoing_ms),
        }
    }

    /// Interval between outgoing heart-beats, if any
    pub fn send_interval(&self) -> Option<Duration> {
        (self.outgoing_ms > 0).then(|| Duration::from_millis(self.outgoing_ms))
    }

    /// Silence after which the peer is considered gone, if monitored
    pub fn receive_deadline(&self) -> Option<Duration> {
        (self.incoming_ms > 0)
            .then(|| Duration::from_millis(self.incoming_ms) * INCOMING_TOLERANCE)
    }
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

impl FromStr for Heartbeat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidHeader {
            name: "heart-beat".to_string(),
            reason: format!("expected <ms>,<ms>, got {}", s),
        };
        let (out, inc) = s.split_once(',').ok_or_else(invalid)?;
        Ok(Heartbeat {
            outgoing_ms: out.trim().parse().map_err(|_| invalid())?,
            incoming_ms: inc.trim().parse().map_err(|_| invalid())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_takes_larger_interval() {
        let client = Heartbeat::new(4000, 4000);
        let server = Heartbeat::new(10000, 10000);
        assert_eq!(
            Heartbeat::negotiate(client, server),
            Heartbeat::new(10000, 10000)
        );
    }

    #[test]
    fn test_negotiate_zero_disables_direction() {
        let client = Heartbeat::new(4000, 4000);
        let server = Heartbeat::new(0, 5000);
        let negotiated = Heartbeat::negotiate(client, server);
        assert_eq!(negotiated.outgoing_ms, 5000);
        assert_eq!(negotiated.incoming_ms, 0);
        assert_eq!(negotiated.receive_deadline(), None);
    }

    #[test]
    fn test_parse() {
        assert_eq!("0, 4000".parse::<Heartbeat>().unwrap(), Heartbeat::new(0, 4000));
        assert!("4000".parse::<Heartbeat>().is_err());
        assert!("a,b".parse::<Heartbeat>().is_err());
    }

    #[test]
    fn test_receive_deadline_has_tolerance() {
        let hb = Heartbeat::new(0, 4000);
        assert_eq!(hb.receive_deadline(), Some(Duration::from_millis(8000)));
    }
}
