//! Thin realtime client over the Phoenix Channels v1 protocol.
//!
//! Provides a WebSocket client using `tokio-tungstenite` that handles
//! heartbeats, channel join/leave, and auto-reconnect with backoff.
//! [`RealtimeFeed`] layers row-change subscriptions on top of it.

mod client;
mod connection;
mod feed;
mod handler;
mod types;

pub use client::RealtimeClient;
pub use feed::RealtimeFeed;
pub use types::{ChannelConfig, PhoenixMessage, RealtimeConfig, RealtimeEvent};
