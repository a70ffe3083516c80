//! Environment variable overrides for secrets and endpoints.

use crate::schema::CommuneConfig;

pub const ENV_PROJECT_REF: &str = "COMMUNE_PROJECT_REF";
pub const ENV_API_KEY: &str = "COMMUNE_API_KEY";
pub const ENV_BASE_URL: &str = "COMMUNE_BASE_URL";

/// Apply overrides from the process environment.
pub fn apply_env_overrides(config: &mut CommuneConfig) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary lookup. Empty values are ignored.
pub fn apply_overrides_from<F>(config: &mut CommuneConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get(ENV_PROJECT_REF) {
        config.backend.project_ref = v;
    }
    if let Some(v) = get(ENV_API_KEY) {
        config.backend.api_key = v;
    }
    if let Some(v) = get(ENV_BASE_URL) {
        config.backend.base_url = Some(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn overrides_replace_backend_fields() {
        let env: HashMap<&str, &str> = [
            (ENV_PROJECT_REF, "xyz"),
            (ENV_API_KEY, "anon-key"),
            (ENV_BASE_URL, "http://localhost:54321"),
        ]
        .into_iter()
        .collect();

        let mut config = CommuneConfig::default();
        apply_overrides_from(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.backend.project_ref, "xyz");
        assert_eq!(config.backend.api_key, "anon-key");
        assert_eq!(
            config.backend.base_url.as_deref(),
            Some("http://localhost:54321")
        );
    }

    #[test]
    fn empty_values_are_ignored() {
        let mut config = CommuneConfig::default();
        config.backend.api_key = "from-file".into();
        apply_overrides_from(&mut config, |k| {
            (k == ENV_API_KEY).then(|| "  ".to_string())
        });
        assert_eq!(config.backend.api_key, "from-file");
    }
}
