//! [`ChangeFeed`] implementation over a realtime connection.
//!
//! Each subscription joins its own channel. A router task reads the
//! client's event stream and forwards row changes to the receiver
//! registered for the channel's topic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::client::RealtimeClient;
use super::types::{ChannelConfig, RealtimeConfig, RealtimeEvent};
use crate::changes::{ChangeFeed, ChangeFilter, RowChange};
use crate::store::StoreError;

struct Route {
    filter: ChangeFilter,
    tx: mpsc::Sender<RowChange>,
}

type Routes = Arc<RwLock<HashMap<String, Route>>>;

pub struct RealtimeFeed {
    client: RealtimeClient,
    routes: Routes,
    access_token: Option<String>,
    router: JoinHandle<()>,
}

impl RealtimeFeed {
    /// Open the connection and start routing events.
    pub fn connect(config: RealtimeConfig) -> Self {
        let access_token = config.access_token.clone();
        let (client, events) = RealtimeClient::connect(config);
        let routes: Routes = Arc::new(RwLock::new(HashMap::new()));
        let router = tokio::spawn(route_events(events, Arc::clone(&routes)));
        Self {
            client,
            routes,
            access_token,
            router,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.client.is_connected().await
    }

    /// Leave every channel and close the socket.
    pub async fn disconnect(&self) {
        self.routes.write().await.clear();
        self.client.disconnect().await;
    }
}

impl Drop for RealtimeFeed {
    fn drop(&mut self) {
        self.router.abort();
    }
}

#[async_trait]
impl ChangeFeed for RealtimeFeed {
    async fn subscribe(
        &self,
        channel: &str,
        filter: ChangeFilter,
    ) -> Result<mpsc::Receiver<RowChange>, StoreError> {
        if !self.client.is_running() {
            return Err(StoreError::Realtime("connection closed".into()));
        }
        let (tx, rx) = mpsc::channel(256);
        let config = ChannelConfig {
            changes: vec![filter.clone()],
            access_token: self.access_token.clone(),
        };
        self.routes
            .write()
            .await
            .insert(channel.to_string(), Route { filter, tx });
        self.client.join_channel(channel, config).await;
        debug!(channel = %channel, "Subscribed to row changes");
        Ok(rx)
    }

    async fn unsubscribe(&self, channel: &str) {
        if self.routes.write().await.remove(channel).is_some() {
            self.client.leave_channel(channel).await;
            debug!(channel = %channel, "Unsubscribed from row changes");
        }
    }
}

async fn route_events(mut events: mpsc::Receiver<RealtimeEvent>, routes: Routes) {
    while let Some(event) = events.recv().await {
        match event {
            RealtimeEvent::PostgresChange { topic, change } => {
                let tx = {
                    let routes = routes.read().await;
                    routes
                        .get(&topic)
                        .filter(|route| route.filter.accepts(&change))
                        .map(|route| route.tx.clone())
                };
                if let Some(tx) = tx {
                    if tx.send(change).await.is_err() {
                        // Receiver dropped without unsubscribing.
                        routes.write().await.remove(&topic);
                    }
                }
            }
            RealtimeEvent::Connected => info!("Realtime connected"),
            RealtimeEvent::Disconnected => info!("Realtime disconnected"),
            RealtimeEvent::ChannelJoined { topic } => debug!(topic = %topic, "Channel joined"),
            RealtimeEvent::ChannelError { topic, message } => {
                warn!(topic = %topic, message = %message, "Channel error");
            }
            RealtimeEvent::Error(e) => warn!(error = %e, "Realtime error"),
        }
    }
}
