//! Commune configuration system.
//!
//! TOML-based configuration with environment overrides and validation.
//! All sections use sensible defaults so partial configs work out of the box.

pub mod env;
pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    BackendConfig, CommuneConfig, GeolocationConfig, LogLevel, LoggingConfig,
    NotificationsConfig, PresenceConfig, RealtimeConfig,
};

use commune_common::ConfigError;
use std::path::Path;

/// Load config from the platform default path, or from `path` when given,
/// then apply environment overrides and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<CommuneConfig, ConfigError> {
    let mut config = match path {
        Some(p) => toml_loader::load_from_path(p)?,
        None => toml_loader::load_default()?,
    };
    env::apply_env_overrides(&mut config);
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &CommuneConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
