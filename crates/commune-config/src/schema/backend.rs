//! Backend connection settings: REST endpoint and realtime socket.

use serde::{Deserialize, Serialize};

/// Hosted backend connection configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Project reference (e.g., "abcdefghijklmnop"), used to derive the
    /// default REST and realtime URLs.
    pub project_ref: String,
    /// Publishable anon key, sent with every request.
    pub api_key: String,
    /// Optional base URL override for self-hosted deployments
    /// (e.g., "http://localhost:54321").
    pub base_url: Option<String>,
    /// Per-request timeout for REST calls.
    pub request_timeout_secs: u32,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("project_ref", &self.project_ref)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            project_ref: String::new(),
            api_key: String::new(),
            base_url: None,
            request_timeout_secs: 10,
        }
    }
}

impl BackendConfig {
    /// HTTP origin of the backend, without a trailing slash.
    pub fn origin(&self) -> String {
        match &self.base_url {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => format!("https://{}.supabase.co", self.project_ref),
        }
    }

    /// Root of the auto-generated REST API.
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.origin())
    }

    /// WebSocket URL of the realtime service.
    pub fn realtime_url(&self) -> String {
        let origin = self.origin();
        let ws_origin = if let Some(rest) = origin.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = origin.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            origin
        };
        format!(
            "{ws_origin}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.api_key
        )
    }

    /// Whether enough is configured to talk to a backend at all.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
            && (!self.project_ref.is_empty() || self.base_url.as_deref().is_some_and(|u| !u.is_empty()))
    }
}

/// Realtime socket tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Phoenix heartbeat interval in seconds.
    pub heartbeat_interval: u32,
    /// Reconnect base delay in seconds.
    pub reconnect_delay: u32,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: 25,
            reconnect_delay: 1,
            max_reconnect_delay: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_derive_from_project_ref() {
        let config = BackendConfig {
            project_ref: "abc".into(),
            api_key: "anon".into(),
            ..Default::default()
        };
        assert_eq!(config.rest_url(), "https://abc.supabase.co/rest/v1");
        assert_eq!(
            config.realtime_url(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }

    #[test]
    fn base_url_override_switches_scheme() {
        let config = BackendConfig {
            api_key: "anon".into(),
            base_url: Some("http://localhost:54321/".into()),
            ..Default::default()
        };
        assert_eq!(config.rest_url(), "http://localhost:54321/rest/v1");
        assert!(config
            .realtime_url()
            .starts_with("ws://localhost:54321/realtime/v1/websocket"));
        assert!(config.is_configured());
    }

    #[test]
    fn unconfigured_by_default() {
        assert!(!BackendConfig::default().is_configured());
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = BackendConfig {
            api_key: "super-secret".into(),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
