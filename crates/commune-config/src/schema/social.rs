//! Social feature configuration: notification feed, presence, geolocation.

use serde::{Deserialize, Serialize};

/// Notification feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Number of most recent notifications fetched on start
    /// (valid range: 1-1000). The unread badge is computed from this page.
    pub page_size: u32,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self { page_size: 50 }
    }
}

/// Visitor presence heartbeat configuration. All values in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub enabled: bool,
    /// Presence row upsert interval (valid range: 5-600).
    pub heartbeat_interval: u32,
    /// Stale-row sweep interval. Must not be shorter than the heartbeat.
    pub sweep_interval: u32,
    /// Rows whose `last_seen` is older than this are swept.
    pub stale_after: u32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_interval: 30,
            sweep_interval: 60,
            stale_after: 300,
        }
    }
}

/// Best-effort geolocation lookup used to annotate presence rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationConfig {
    pub enabled: bool,
    pub url: String,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://ip-api.com/json/".into(),
        }
    }
}
