//! Client builder pattern

use std::sync::Arc;

use dispatch_transport::{Connector, WebSocketTransport};

use crate::config::{ClientConfig, SubscriptionRetention};
use crate::error::{ClientError, Result};
use crate::DispatchClient;

/// Builder for DispatchClient
pub struct DispatchClientBuilder {
    config: ClientConfig,
    token: Option<String>,
    connector: Option<Arc<dyn Connector>>,
}

impl DispatchClientBuilder {
    /// Create a new builder
    pub fn new(url: &str) -> Self {
        Self::from_config(ClientConfig::new(url))
    }

    /// Start from an existing configuration
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            token: None,
            connector: None,
        }
    }

    /// Set authentication token
    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Set the delay before the scheduled reconnect, in milliseconds
    pub fn reconnect_delay(mut self, ms: u64) -> Self {
        self.config.reconnect_delay_ms = ms;
        self
    }

    /// Also reconnect after the transport closes on its own
    pub fn reconnect_on_close(mut self, enabled: bool) -> Self {
        self.config.reconnect_on_close = enabled;
        self
    }

    /// Set heart-beat intervals in milliseconds (0 disables a direction)
    pub fn heartbeat(mut self, outgoing_ms: u64, incoming_ms: u64) -> Self {
        self.config.heartbeat_outgoing_ms = outgoing_ms;
        self.config.heartbeat_incoming_ms = incoming_ms;
        self
    }

    /// Set the handshake timeout in milliseconds
    pub fn connect_timeout(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn retention(mut self, retention: SubscriptionRetention) -> Self {
        self.config.retention = retention;
        self
    }

    /// Override the CONNECT virtual host
    pub fn host(mut self, host: &str) -> Self {
        self.config.host = Some(host.to_string());
        self
    }

    /// Use a transport other than WebSocket
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Build without connecting
    pub fn build(self) -> Result<DispatchClient> {
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketTransport::new()));
        DispatchClient::with_connector(self.config, connector)
    }

    /// Build and connect, waiting for the handshake
    pub async fn connect(mut self) -> Result<DispatchClient> {
        let token = self.token.take().ok_or(ClientError::NoCredential)?;
        let client = self.build()?;
        client.connect_and_wait(&token).await?;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_config() {
        let builder = DispatchClientBuilder::new("ws://localhost:8080/chat")
            .reconnect_delay(1000)
            .heartbeat(0, 2000)
            .retention(SubscriptionRetention::ClearOnDisconnect)
            .host("dispatch");

        assert_eq!(builder.config.reconnect_delay_ms, 1000);
        assert_eq!(builder.config.heartbeat_outgoing_ms, 0);
        assert_eq!(builder.config.heartbeat_incoming_ms, 2000);
        assert_eq!(builder.config.virtual_host(), "dispatch");
    }

    #[tokio::test]
    async fn test_connect_requires_token() {
        let result = DispatchClientBuilder::new("ws://localhost:8080/chat")
            .connect()
            .await;
        assert!(matches!(result, Err(ClientError::NoCredential)));
    }

    #[tokio::test]
    async fn test_build_rejects_bad_url() {
        let result = DispatchClientBuilder::new("not a url").build();
        assert!(matches!(result, Err(ClientError::InvalidArgument(_))));
    }
}
