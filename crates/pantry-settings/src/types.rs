//! Settings type definitions.
//!
//! All types use camelCase JSON keys and `#[serde(default)]`, so a partial
//! settings file only needs the values it overrides.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PantrySettings {
    pub server: ServerSettings,
    pub transport: TransportSettings,
    pub logging: LoggingSettings,
}

impl PantrySettings {
    /// Reject values that would leave the hub or the transport unusable.
    pub fn validate(&self) -> Result<()> {
        if self.transport.url.trim().is_empty() {
            return Err(SettingsError::invalid("transport.url", "must not be empty"));
        }
        if self.transport.handshake_timeout_ms == 0 {
            return Err(SettingsError::invalid("transport.handshakeTimeoutMs", "must be positive"));
        }
        if self.transport.send_queue == 0 {
            return Err(SettingsError::invalid("transport.sendQueue", "must hold at least one frame"));
        }
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::invalid("server.maxSendQueue", "must hold at least one frame"));
        }
        if self.server.client_timeout_ms < self.server.heartbeat_interval_ms {
            return Err(SettingsError::invalid(
                "server.clientTimeoutMs",
                "must not be shorter than the heartbeat interval",
            ));
        }
        Ok(())
    }
}

/// Event hub (server) settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Outbound frames buffered per client before new frames are dropped.
    pub max_send_queue: usize,
    pub heartbeat_interval_ms: u64,
    /// Clients silent for longer than this are dropped.
    pub client_timeout_ms: u64,
    /// Static token → user id table. Empty accepts any non-empty token.
    pub tokens: BTreeMap<String, String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
            max_send_queue: 256,
            heartbeat_interval_ms: 30_000,
            client_timeout_ms: 90_000,
            tokens: BTreeMap::new(),
        }
    }
}

impl ServerSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }
}

/// Client transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// WebSocket URL of the event hub.
    pub url: String,
    pub handshake_timeout_ms: u64,
    /// Delay before each single reconnection attempt.
    pub reconnect_delay_ms: u64,
    /// Outbound emit queue length.
    pub send_queue: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:4000/ws".to_string(),
            handshake_timeout_ms: 10_000,
            reconnect_delay_ms: 5_000,
            send_queue: 64,
        }
    }
}

impl TransportSettings {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: String,
    /// JSON lines instead of compact text.
    pub json: bool,
    /// How many recent warn+ events the diagnostics buffer keeps.
    pub diagnostics_capacity: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            diagnostics_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_helpers() {
        let t = TransportSettings::default();
        assert_eq!(t.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(t.reconnect_delay(), Duration::from_secs(5));

        let s = ServerSettings::default();
        assert_eq!(s.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(s.client_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn camel_case_keys() {
        let value = serde_json::to_value(PantrySettings::default()).unwrap();
        assert!(value["transport"].get("handshakeTimeoutMs").is_some());
        assert!(value["server"].get("maxSendQueue").is_some());
        assert!(value["logging"].get("diagnosticsCapacity").is_some());
    }

    #[test]
    fn validate_rejects_empty_url() {
        let mut settings = PantrySettings::default();
        settings.transport.url = "  ".into();
        assert!(matches!(settings.validate(), Err(SettingsError::Invalid { .. })));
    }

    #[test]
    fn validate_rejects_timeout_below_heartbeat() {
        let mut settings = PantrySettings::default();
        settings.server.client_timeout_ms = 1_000;
        assert!(settings.validate().is_err());
    }
}
