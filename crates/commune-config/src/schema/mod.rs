//! Configuration schema types for Commune.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod backend;
mod social;
mod system;

pub use backend::*;
pub use social::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Root configuration for Commune.
///
/// Only override what you want to change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommuneConfig {
    pub backend: BackendConfig,
    pub realtime: RealtimeConfig,
    pub notifications: NotificationsConfig,
    pub presence: PresenceConfig,
    pub geolocation: GeolocationConfig,
    pub logging: LoggingConfig,
}
