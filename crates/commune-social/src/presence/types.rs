use std::time::Duration;

/// Timing of the presence heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSettings {
    /// How often this session's row is refreshed.
    pub heartbeat_interval: Duration,
    /// How often stale rows are deleted.
    pub sweep_interval: Duration,
    /// Rows not refreshed for this long count as gone.
    pub stale_after: Duration,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
        }
    }
}
