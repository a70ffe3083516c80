//! Background WebSocket connection loop with auto-reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::handler::handle_phoenix_message;
use super::types::{ChannelConfig, PhoenixMessage, RealtimeCommand, RealtimeConfig, RealtimeEvent};

// ---------------------------------------------------------------------------
// Ref Counter
// ---------------------------------------------------------------------------

/// Monotonically increasing ref counter for Phoenix messages.
static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_ref() -> String {
    REF_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}

/// Channels that should be (re)joined on reconnect, keyed by short topic.
type JoinedChannels = Arc<RwLock<HashMap<String, ChannelConfig>>>;

fn frame(topic: &str, event: &str, payload: serde_json::Value) -> PhoenixMessage {
    PhoenixMessage {
        topic: format!("realtime:{topic}"),
        event: event.to_string(),
        payload,
        msg_ref: Some(next_ref()),
    }
}

/// Serialize and write one frame. Returns `false` if the socket is gone.
async fn send_frame<S>(writer: &Mutex<S>, msg: &PhoenixMessage) -> bool
where
    S: Sink<WsMessage> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => writer
            .lock()
            .await
            .send(WsMessage::Text(json.into()))
            .await
            .is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize Phoenix frame");
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

/// Background task managing the WebSocket connection with auto-reconnect.
///
/// Exits when a `Disconnect` command arrives or every client handle is dropped.
pub(crate) async fn connection_loop(
    config: RealtimeConfig,
    connected: Arc<RwLock<bool>>,
    event_tx: mpsc::Sender<RealtimeEvent>,
    command_rx: mpsc::Receiver<RealtimeCommand>,
) {
    let command_rx = Arc::new(Mutex::new(command_rx));
    let joined_channels: JoinedChannels = Arc::new(RwLock::new(HashMap::new()));
    let shutdown = CancellationToken::new();
    let mut reconnect_delay = config.reconnect_delay_secs;

    while !shutdown.is_cancelled() {
        let url = config.url.clone();
        info!(url = %url.split('?').next().unwrap_or(""), "Connecting to realtime service");

        match tokio::time::timeout(
            Duration::from_secs(15),
            tokio_tungstenite::connect_async(&url),
        )
        .await
        {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs;
                *connected.write().await = true;
                let _ = event_tx.send(RealtimeEvent::Connected).await;

                let (ws_write, mut ws_read) = ws_stream.split();
                let ws_write = Arc::new(Mutex::new(ws_write));

                // Rejoin previously-joined channels.
                {
                    let channels = joined_channels.read().await;
                    for (topic, channel) in channels.iter() {
                        let msg = frame(topic, "phx_join", join_payload(channel, &config));
                        send_frame(&ws_write, &msg).await;
                    }
                }

                let heartbeat_handle = tokio::spawn(heartbeat_task(
                    Arc::clone(&ws_write),
                    config.heartbeat_interval_secs,
                ));

                let cmd_handle = tokio::spawn(command_forwarder(
                    Arc::clone(&command_rx),
                    Arc::clone(&ws_write),
                    Arc::clone(&joined_channels),
                    config.clone(),
                    shutdown.clone(),
                ));

                loop {
                    let next = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        next = ws_read.next() => next,
                    };
                    match next {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<PhoenixMessage>(&text) {
                                Ok(phoenix_msg) => {
                                    handle_phoenix_message(&phoenix_msg, &event_tx).await;
                                }
                                Err(_) => {
                                    tracing::debug!(text = %text, "Unrecognized realtime frame");
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            info!("Realtime service closed connection");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }

                heartbeat_handle.abort();
                cmd_handle.abort();
                *connected.write().await = false;
                let _ = event_tx.send(RealtimeEvent::Disconnected).await;
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to realtime service");
                let _ = event_tx
                    .send(RealtimeEvent::Error(format!("Connection failed: {e}")))
                    .await;
            }
            Err(_elapsed) => {
                error!("WebSocket connection timed out after 15s");
                let _ = event_tx
                    .send(RealtimeEvent::Error(
                        "Connection timed out after 15s".to_string(),
                    ))
                    .await;
            }
        }

        if shutdown.is_cancelled() {
            break;
        }

        info!(delay = reconnect_delay, "Reconnecting in {} seconds", reconnect_delay);
        tokio::time::sleep(Duration::from_secs(reconnect_delay)).await;
        reconnect_delay = next_backoff(reconnect_delay, config.max_reconnect_delay_secs);
    }

    info!("Realtime connection loop stopped");
}

/// Double the delay, capped at `max`.
pub(crate) fn next_backoff(current: u64, max: u64) -> u64 {
    current.saturating_mul(2).max(1).min(max)
}

/// Join payload with the connection-level token applied when the channel has none.
fn join_payload(channel: &ChannelConfig, config: &RealtimeConfig) -> serde_json::Value {
    if channel.access_token.is_none() && config.access_token.is_some() {
        let mut with_token = channel.clone();
        with_token.access_token = config.access_token.clone();
        with_token.to_join_payload()
    } else {
        channel.to_join_payload()
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task<S>(ws_write: Arc<Mutex<S>>, interval_secs: u64)
where
    S: Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        let msg = PhoenixMessage {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: serde_json::json!({}),
            msg_ref: Some(next_ref()),
        };
        if !send_frame(&ws_write, &msg).await {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Command Forwarder
// ---------------------------------------------------------------------------

async fn command_forwarder<S>(
    cmd_rx: Arc<Mutex<mpsc::Receiver<RealtimeCommand>>>,
    cmd_write: Arc<Mutex<S>>,
    channels: JoinedChannels,
    config: RealtimeConfig,
    shutdown: CancellationToken,
) where
    S: Sink<WsMessage> + Unpin,
{
    let mut rx = cmd_rx.lock().await;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RealtimeCommand::JoinChannel { topic, config: channel } => {
                let msg = frame(&topic, "phx_join", join_payload(&channel, &config));
                send_frame(&cmd_write, &msg).await;
                channels.write().await.insert(topic, channel);
            }
            RealtimeCommand::LeaveChannel { topic } => {
                let msg = frame(&topic, "phx_leave", serde_json::json!({}));
                send_frame(&cmd_write, &msg).await;
                channels.write().await.remove(&topic);
            }
            RealtimeCommand::Disconnect => {
                let topics: Vec<String> = channels.write().await.drain().map(|(t, _)| t).collect();
                for topic in topics {
                    let msg = frame(&topic, "phx_leave", serde_json::json!({}));
                    send_frame(&cmd_write, &msg).await;
                }
                let _ = cmd_write.lock().await.send(WsMessage::Close(None)).await;
                shutdown.cancel();
                return;
            }
        }
    }
    // Every client handle was dropped.
    shutdown.cancel();
}
