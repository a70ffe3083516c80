//! Configuration, protocol types, and event/command enums for the realtime client.

use serde::{Deserialize, Serialize};

use crate::changes::{ChangeFilter, RowChange};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to the realtime service.
#[derive(Clone)]
pub struct RealtimeConfig {
    /// Full WebSocket URL including `apikey` and `vsn` query parameters.
    pub url: String,
    /// Optional access token (JWT) sent with every channel join.
    pub access_token: Option<String>,
    /// Heartbeat interval in seconds (default: 25).
    pub heartbeat_interval_secs: u64,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
}

impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("url", &self.url.split('?').next().unwrap_or(""))
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("max_reconnect_delay_secs", &self.max_reconnect_delay_secs)
            .finish()
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            access_token: None,
            heartbeat_interval_secs: 25,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Phoenix Protocol Types
// ---------------------------------------------------------------------------

/// A Phoenix protocol message envelope (v1 JSON format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
    #[serde(rename = "ref")]
    pub msg_ref: Option<String>,
}

// ---------------------------------------------------------------------------
// Channel Configuration
// ---------------------------------------------------------------------------

/// Configuration for a realtime channel: which table changes it listens to.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub changes: Vec<ChangeFilter>,
    pub access_token: Option<String>,
}

impl ChannelConfig {
    pub fn for_changes(filter: ChangeFilter) -> Self {
        Self {
            changes: vec![filter],
            access_token: None,
        }
    }

    /// Serialize to the JSON payload expected by `phx_join`.
    pub(crate) fn to_join_payload(&self) -> serde_json::Value {
        let changes: Vec<serde_json::Value> = self
            .changes
            .iter()
            .map(|f| {
                let mut entry = serde_json::json!({
                    "event": f.events.as_str(),
                    "schema": "public",
                    "table": f.table.name(),
                });
                if let Some(expr) = f.filter_expr() {
                    entry["filter"] = serde_json::json!(expr);
                }
                entry
            })
            .collect();

        let mut payload = serde_json::json!({
            "config": {
                "broadcast": { "self": false, "ack": false },
                "presence": { "key": "" },
                "postgres_changes": changes
            }
        });
        if let Some(token) = &self.access_token {
            payload["access_token"] = serde_json::json!(token);
        }
        payload
    }
}

// ---------------------------------------------------------------------------
// Events & Commands
// ---------------------------------------------------------------------------

/// Events emitted by the realtime client.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// WebSocket connection established.
    Connected,
    /// WebSocket connection lost.
    Disconnected,
    /// Successfully joined a channel.
    ChannelJoined { topic: String },
    /// Channel closed or errored.
    ChannelError { topic: String, message: String },
    /// A row-level change delivered on a channel.
    PostgresChange { topic: String, change: RowChange },
    /// Error.
    Error(String),
}

/// Commands sent to the realtime client from the application layer.
#[derive(Debug)]
pub(crate) enum RealtimeCommand {
    JoinChannel {
        topic: String,
        config: ChannelConfig,
    },
    LeaveChannel {
        topic: String,
    },
    Disconnect,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Table;

    #[test]
    fn join_payload_lists_postgres_changes() {
        let config = ChannelConfig {
            changes: vec![ChangeFilter::inserts(Table::Messages).where_eq("conversation_id", "c1")],
            access_token: Some("jwt".into()),
        };
        let payload = config.to_join_payload();
        let change = &payload["config"]["postgres_changes"][0];
        assert_eq!(change["event"], "INSERT");
        assert_eq!(change["schema"], "public");
        assert_eq!(change["table"], "messages");
        assert_eq!(change["filter"], "conversation_id=eq.c1");
        assert_eq!(payload["access_token"], "jwt");
    }

    #[test]
    fn unfiltered_channel_omits_filter_key() {
        let config = ChannelConfig::for_changes(ChangeFilter::all(Table::ActiveVisitors));
        let payload = config.to_join_payload();
        let change = &payload["config"]["postgres_changes"][0];
        assert_eq!(change["event"], "*");
        assert!(change.get("filter").is_none());
        assert!(payload.get("access_token").is_none());
    }

    #[test]
    fn debug_hides_api_key_in_url() {
        let config = RealtimeConfig {
            url: "wss://x.supabase.co/realtime/v1/websocket?apikey=secret&vsn=1.0.0".into(),
            access_token: Some("jwt".into()),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(!debug.contains("jwt"));
    }
}
