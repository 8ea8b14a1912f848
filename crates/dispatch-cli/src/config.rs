//! CLI configuration file

use anyhow::{Context, Result};
use dispatch_client::ClientConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Contents of `config.toml`
///
/// ```toml
/// user_id = "1912177586428452864"
/// watch_active_incidents = true
///
/// [client]
/// url = "wss://api.example.com/chat"
/// reconnect_on_close = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Identity whose notifications are watched and who joins events
    pub user_id: Option<String>,
    /// Subscribe to the ambulance provider's active-incident broadcast
    pub watch_active_incidents: bool,
    /// Subscribe to the hospital admit-request broadcast
    pub watch_admit_requests: bool,
    pub client: ClientConfig,
}

impl CliConfig {
    /// Load from `path`, or from the default location if it exists, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// `~/.config/dispatch/config.toml` or the platform equivalent
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dispatch").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_client::SubscriptionRetention;

    #[test]
    fn test_parse_full() {
        let config = CliConfig::parse(
            r#"
            user_id = "42"
            watch_admit_requests = true

            [client]
            url = "wss://api.example.com/chat"
            reconnect_delay_ms = 2000
            retention = "clear_on_disconnect"
            "#,
        )
        .unwrap();

        assert_eq!(config.user_id.as_deref(), Some("42"));
        assert!(config.watch_admit_requests);
        assert!(!config.watch_active_incidents);
        assert_eq!(config.client.url, "wss://api.example.com/chat");
        assert_eq!(config.client.reconnect_delay_ms, 2000);
        assert_eq!(config.client.heartbeat_outgoing_ms, 4000);
        assert_eq!(config.client.retention, SubscriptionRetention::ClearOnDisconnect);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(CliConfig::parse("").unwrap(), CliConfig::default());
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        assert!(CliConfig::parse("watch_active_incidents = \"yes\"").is_err());
    }
}
