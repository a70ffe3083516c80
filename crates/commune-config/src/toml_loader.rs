//! TOML config file loading and creation.

use crate::schema::CommuneConfig;
use crate::validation;
use commune_common::ConfigError;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load config from a specific TOML file path.
///
/// Deserializes the file using serde defaults for any missing fields.
/// After loading, the config is validated; if validation fails, a warning
/// is logged and the default config is returned.
pub fn load_from_path(path: &Path) -> Result<CommuneConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::ParseError(format!("failed to read {}: {e}", path.display()))
    })?;

    let config: CommuneConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))?;

    if let Err(e) = validation::validate(&config) {
        warn!("config validation warning: {e}");
        warn!("falling back to default config");
        return Ok(CommuneConfig::default());
    }

    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Load config from the platform-specific default path.
///
/// If the file does not exist, creates a default config file and returns defaults.
pub fn load_default() -> Result<CommuneConfig, ConfigError> {
    let path = default_config_path()?;

    if !path.exists() {
        info!("no config found at {}, creating default", path.display());
        create_default_config(&path)?;
        return Ok(CommuneConfig::default());
    }

    load_from_path(&path)
}

/// Get the platform-specific default config file path.
///
/// On macOS: `~/Library/Application Support/commune/config.toml`
/// On Linux: `~/.config/commune/config.toml`
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::ParseError("could not determine config directory".into()))?;
    Ok(config_dir.join("commune").join("config.toml"))
}

/// Create a default TOML config file with documentation comments.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ConfigError::ParseError(format!(
                "failed to create config directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    std::fs::write(path, default_config_toml()).map_err(|e| {
        ConfigError::ParseError(format!(
            "failed to write default config to {}: {e}",
            path.display()
        ))
    })?;

    info!("created default config at {}", path.display());
    Ok(())
}

fn default_config_toml() -> &'static str {
    r##"# Commune Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.
# COMMUNE_PROJECT_REF, COMMUNE_API_KEY and COMMUNE_BASE_URL override [backend].

[backend]
# project_ref = ""
# api_key = ""
# base_url = "http://localhost:54321"   # self-hosted override
# request_timeout_secs = 10

[realtime]
# heartbeat_interval = 25   # 5-120
# reconnect_delay = 1
# max_reconnect_delay = 30

[notifications]
# page_size = 50            # 1-1000

[presence]
# enabled = true
# heartbeat_interval = 30   # 5-600
# sweep_interval = 60
# stale_after = 300

[geolocation]
# enabled = true
# url = "http://ip-api.com/json/"

[logging]
# level = "INFO"            # DEBUG, INFO, WARNING, ERROR
"##
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_missing_path_errors() {
        let result = load_from_path(Path::new("/tmp/nonexistent_commune_config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[backend]
project_ref = "abc"

[notifications]
page_size = 20
"#,
        )
        .unwrap();

        let config = load_from_path(&path).unwrap();
        assert_eq!(config.backend.project_ref, "abc");
        assert_eq!(config.notifications.page_size, 20);
        assert_eq!(config.presence.heartbeat_interval, 30);
        assert_eq!(config.presence.stale_after, 300);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[notifications]\npage_size = 0\n").unwrap();

        let config = load_from_path(&path).unwrap();
        assert_eq!(config.notifications.page_size, 50);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[backend\nproject_ref = ").unwrap();

        let result = load_from_path(&path);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn default_file_parses_to_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        create_default_config(&path).unwrap();

        let config = load_from_path(&path).unwrap();
        assert_eq!(config.notifications.page_size, 50);
        assert_eq!(config.realtime.heartbeat_interval, 25);
        assert!(config.geolocation.enabled);
    }
}
