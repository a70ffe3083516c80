//! Incoming Phoenix message handler and row-change parsing.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::types::{PhoenixMessage, RealtimeEvent};
use crate::changes::{ChangeKind, RowChange};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the short topic name from a Phoenix topic (strip "realtime:" prefix).
fn strip_topic_prefix(topic: &str) -> &str {
    topic.strip_prefix("realtime:").unwrap_or(topic)
}

/// Parse a `postgres_changes` payload.
///
/// The backend sends `{ "data": { "type": "INSERT", "table": "...",
/// "record": {...}, "old_record": {...} }, "ids": [...] }`.
pub(crate) fn parse_row_change(payload: &Value) -> Option<RowChange> {
    let data = payload.get("data")?;
    let kind = ChangeKind::parse(data.get("type")?.as_str()?)?;
    let table = data.get("table")?.as_str()?.to_string();
    Some(RowChange {
        kind,
        table,
        record: data.get("record").cloned().unwrap_or(Value::Null),
        old_record: data.get("old_record").cloned().unwrap_or(Value::Null),
    })
}

// ---------------------------------------------------------------------------
// Message Handler
// ---------------------------------------------------------------------------

/// Handle a single incoming Phoenix message.
pub(crate) async fn handle_phoenix_message(
    msg: &PhoenixMessage,
    event_tx: &mpsc::Sender<RealtimeEvent>,
) {
    // Heartbeat acks.
    if msg.topic == "phoenix" {
        return;
    }
    let topic = strip_topic_prefix(&msg.topic);

    match msg.event.as_str() {
        "phx_reply" => {
            if let Some(status) = msg.payload.get("status").and_then(|s| s.as_str()) {
                if status == "ok" {
                    debug!(topic = %topic, "Channel reply: ok");
                    let _ = event_tx
                        .send(RealtimeEvent::ChannelJoined {
                            topic: topic.to_string(),
                        })
                        .await;
                } else {
                    let message = msg
                        .payload
                        .get("response")
                        .and_then(|r| r.get("reason"))
                        .and_then(|r| r.as_str())
                        .unwrap_or("unknown error")
                        .to_string();
                    warn!(topic = %topic, status = %status, "Channel reply error");
                    let _ = event_tx
                        .send(RealtimeEvent::ChannelError {
                            topic: topic.to_string(),
                            message,
                        })
                        .await;
                }
            }
        }
        "phx_error" => {
            warn!(topic = %topic, "Channel error");
            let _ = event_tx
                .send(RealtimeEvent::ChannelError {
                    topic: topic.to_string(),
                    message: "Channel error".to_string(),
                })
                .await;
        }
        "phx_close" => {
            info!(topic = %topic, "Channel closed");
            let _ = event_tx
                .send(RealtimeEvent::ChannelError {
                    topic: topic.to_string(),
                    message: "Channel closed".to_string(),
                })
                .await;
        }
        "postgres_changes" => match parse_row_change(&msg.payload) {
            Some(change) => {
                debug!(topic = %topic, table = %change.table, kind = ?change.kind, "Row change received");
                let _ = event_tx
                    .send(RealtimeEvent::PostgresChange {
                        topic: topic.to_string(),
                        change,
                    })
                    .await;
            }
            None => {
                warn!(topic = %topic, "Malformed postgres_changes payload");
            }
        },
        "system" => {
            debug!(topic = %topic, payload = %msg.payload, "System message");
        }
        _ => {
            debug!(
                topic = %topic,
                event = %msg.event,
                "Unhandled Phoenix event"
            );
        }
    }
}
