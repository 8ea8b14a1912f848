//! Client configuration

use std::time::Duration;

use dispatch_core::{Heartbeat, DEFAULT_HEARTBEAT_MS, DEFAULT_RECONNECT_DELAY_MS};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// What an explicit `disconnect()` does to joined subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionRetention {
    /// Keep every subscription; the next handshake replays them
    #[default]
    Retain,
    /// Drop joined subscriptions; standing ones are kept
    ClearOnDisconnect,
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Endpoint of the STOMP WebSocket, e.g. `wss://api.example.com/chat`
    pub url: String,
    /// Value of the CONNECT `host` header; defaults to the endpoint host
    pub host: Option<String>,
    /// Query parameter carrying the credential
    pub token_param: String,
    /// Delay before the single scheduled reconnect after a protocol failure
    pub reconnect_delay_ms: u64,
    /// Smallest interval at which we send heart-beats (0 = never)
    pub heartbeat_outgoing_ms: u64,
    /// Interval at which we want heart-beats from the broker (0 = never)
    pub heartbeat_incoming_ms: u64,
    /// Time allowed for transport connect plus CONNECT/CONNECTED
    pub connect_timeout_ms: u64,
    /// Also schedule a reconnect when the transport closes on its own
    pub reconnect_on_close: bool,
    pub retention: SubscriptionRetention,
    /// Capacity of the client event broadcast channel
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/chat".to_string(),
            host: None,
            token_param: "token".to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            heartbeat_outgoing_ms: DEFAULT_HEARTBEAT_MS,
            heartbeat_incoming_ms: DEFAULT_HEARTBEAT_MS,
            connect_timeout_ms: 10_000,
            reconnect_on_close: false,
            retention: SubscriptionRetention::Retain,
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Build a config from `DISPATCH_*` environment variables, falling back
    /// to defaults for anything unset
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("DISPATCH_SOCKET_URL") {
            config.url = url;
        }
        if let Some(ms) = parse_ms(&lookup, "DISPATCH_RECONNECT_DELAY_MS")? {
            config.reconnect_delay_ms = ms;
        }
        if let Some(ms) = parse_ms(&lookup, "DISPATCH_HEARTBEAT_MS")? {
            config.heartbeat_outgoing_ms = ms;
            config.heartbeat_incoming_ms = ms;
        }
        if let Some(ms) = parse_ms(&lookup, "DISPATCH_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout_ms = ms;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the session cannot run with
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.url)
            .map_err(|e| ClientError::InvalidArgument(format!("url {:?}: {}", self.url, e)))?;
        if self.token_param.is_empty() {
            return Err(ClientError::InvalidArgument(
                "token_param must not be empty".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ClientError::InvalidArgument(
                "connect_timeout_ms must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ClientError::InvalidArgument(
                "event_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Endpoint with the credential embedded as a query parameter
    pub fn connection_url(&self, credential: &str) -> Result<String> {
        let mut url = url::Url::parse(&self.url)
            .map_err(|e| ClientError::InvalidArgument(format!("url {:?}: {}", self.url, e)))?;
        url.query_pairs_mut().append_pair(&self.token_param, credential);
        Ok(url.into())
    }

    /// Virtual host sent in CONNECT
    pub fn virtual_host(&self) -> String {
        if let Some(host) = &self.host {
            return host.clone();
        }
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn heartbeat_offer(&self) -> Heartbeat {
        Heartbeat::new(self.heartbeat_outgoing_ms, self.heartbeat_incoming_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn parse_ms(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|_| ClientError::InvalidArgument(format!("{}={:?} is not a number", key, raw)))
        })
        .transpose()
}
