//! The relay's settings surface.
//!
//! Every knob lives here with a workable default; the binary optionally
//! overlays a JSON settings file on top (missing fields keep their
//! defaults thanks to `#[serde(default)]`).

use std::path::Path;
use std::time::Duration;

use relaymesh_room::RegistryConfig;
use relaymesh_transport::PacketLimits;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Full configuration for a relay instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Shared secret every client must present to authenticate.
    pub secret: String,
    /// Address the game transport listens on.
    pub bind_addr: String,
    /// Length of generated room ids (letters A–Z).
    pub room_id_length: usize,
    /// Largest reliable payload the relay will carry.
    pub max_reliable_size: usize,
    /// Largest unreliable payload the relay will carry.
    pub max_unreliable_size: usize,
    /// Interval of the heartbeat/sweep tick in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Whether the NAT punch coordinator runs at all.
    pub punch_enabled: bool,
    /// UDP port for punch announces (0 picks an ephemeral port).
    pub punch_port: u16,
    /// Socket proxies idle longer than this are disposed.
    pub proxy_idle_timeout_ms: u64,
    /// Whether the compressed room listing is served over HTTP.
    pub listing_enabled: bool,
    /// Address of the listing endpoint.
    pub listing_addr: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            secret: "change this secret".to_string(),
            bind_addr: "0.0.0.0:7777".to_string(),
            room_id_length: 5,
            max_reliable_size: 16 * 1024,
            max_unreliable_size: 1200,
            heartbeat_interval_ms: 1000,
            punch_enabled: true,
            punch_port: 7776,
            proxy_idle_timeout_ms: 10_000,
            listing_enabled: true,
            listing_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl RelayConfig {
    /// Loads settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn packet_limits(&self) -> PacketLimits {
        PacketLimits {
            reliable: self.max_reliable_size,
            unreliable: self.max_unreliable_size,
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            secret: self.secret.clone(),
            room_id_length: self.room_id_length,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn proxy_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_idle_timeout_ms)
    }
}
