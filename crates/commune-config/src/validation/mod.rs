//! Full configuration validation.
//!
//! Each section has its own check; this orchestrator runs them all and
//! collects errors into a single `ConfigError`.

mod helpers;
mod sections;


use crate::schema::CommuneConfig;
use commune_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &CommuneConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    sections::validate_backend(&mut errors, config);
    sections::validate_realtime(&mut errors, config);
    sections::validate_notifications(&mut errors, config);
    sections::validate_presence(&mut errors, config);
    sections::validate_geolocation(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
