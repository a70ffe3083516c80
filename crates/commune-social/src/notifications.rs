//! Live notification feed for one user.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::changes::{ChangeFeed, ChangeFilter, RowChange};
use crate::error::SocialError;
use crate::model::{Notification, NotificationDraft};
use crate::scope::{instance_channel, ScopedChannel};
use crate::store::{decode_row, decode_rows, Query, RemoteStore, StoreError, Table};

/// Number of notifications fetched on start.
pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Default)]
struct FeedState {
    /// Newest first.
    notifications: Vec<Notification>,
    /// Unread rows among the fetched page plus one per live insert.
    unread: u64,
}

pub struct NotificationFeed {
    store: Arc<dyn RemoteStore>,
    user_id: String,
    state: Arc<RwLock<FeedState>>,
    scope: ScopedChannel,
}

impl NotificationFeed {
    /// Fetch the latest page for `user_id` and start listening for new rows.
    ///
    /// New notifications are also forwarded on the returned receiver.
    pub async fn start(
        store: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        user_id: &str,
        page_size: usize,
    ) -> Result<(Self, mpsc::Receiver<Notification>), SocialError> {
        let channel = instance_channel(&format!("notifications:{user_id}"));
        let changes = feed
            .subscribe(
                &channel,
                ChangeFilter::inserts(Table::Notifications).where_eq("user_id", user_id),
            )
            .await?;
        let mut scope = ScopedChannel::new(channel, feed);

        let query = Query::table(Table::Notifications)
            .eq("user_id", user_id)
            .order_desc("created_at")
            .limit(page_size);
        let notifications: Vec<Notification> = match store.select(&query).await {
            Ok(rows) => decode_rows(rows)?,
            Err(e) => {
                scope.release().await;
                return Err(e.into());
            }
        };
        let unread = notifications.iter().filter(|n| !n.is_read).count() as u64;
        info!(user_id = %user_id, fetched = notifications.len(), unread, "Notification feed started");

        let state = Arc::new(RwLock::new(FeedState {
            notifications,
            unread,
        }));
        let (out_tx, out_rx) = mpsc::channel(64);
        scope.track(tokio::spawn(consume(
            changes,
            Arc::clone(&state),
            out_tx,
            scope.token(),
        )));

        Ok((
            Self {
                store,
                user_id: user_id.to_string(),
                state,
                scope,
            },
            out_rx,
        ))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Local notifications, newest first.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.read().await.notifications.clone()
    }

    pub async fn unread_count(&self) -> u64 {
        self.state.read().await.unread
    }

    /// Mark one notification read. The local change is applied first and
    /// kept even if the remote write fails.
    pub async fn mark_as_read(&self, id: &str) -> Result<(), SocialError> {
        if self.scope.is_released() {
            return Err(SocialError::Closed);
        }
        {
            let mut state = self.state.write().await;
            let FeedState {
                notifications,
                unread,
            } = &mut *state;
            if let Some(n) = notifications.iter_mut().find(|n| n.id == id) {
                if !n.is_read {
                    n.is_read = true;
                    *unread = unread.saturating_sub(1);
                }
            }
        }
        self.store
            .update(
                &Query::table(Table::Notifications).eq("id", id),
                json!({ "is_read": true }),
            )
            .await?;
        Ok(())
    }

    /// Mark everything read with a single bulk update.
    pub async fn mark_all_as_read(&self) -> Result<(), SocialError> {
        if self.scope.is_released() {
            return Err(SocialError::Closed);
        }
        {
            let mut state = self.state.write().await;
            for n in state.notifications.iter_mut() {
                n.is_read = true;
            }
            state.unread = 0;
        }
        self.store
            .update(
                &Query::table(Table::Notifications)
                    .eq("user_id", self.user_id.as_str())
                    .eq("is_read", false),
                json!({ "is_read": true }),
            )
            .await?;
        Ok(())
    }

    /// Stop listening and release the channel.
    pub async fn close(&mut self) {
        self.scope.release().await;
        debug!(user_id = %self.user_id, "Notification feed closed");
    }
}

async fn consume(
    mut changes: mpsc::Receiver<RowChange>,
    state: Arc<RwLock<FeedState>>,
    out: mpsc::Sender<Notification>,
    token: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            _ = token.cancelled() => break,
            change = changes.recv() => match change {
                Some(change) => change,
                None => break,
            },
        };
        let notification: Notification = match decode_row(change.record) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable notification");
                continue;
            }
        };

        {
            let mut state = state.write().await;
            if token.is_cancelled() {
                break;
            }
            if state.notifications.iter().any(|n| n.id == notification.id) {
                continue;
            }
            state.notifications.insert(0, notification.clone());
            state.unread += 1;
        }
        debug!(id = %notification.id, kind = ?notification.kind, "Notification received");
        let _ = out.try_send(notification);
    }
}

/// Write a notification addressed to another user.
pub async fn send_notification(
    store: &dyn RemoteStore,
    draft: NotificationDraft,
) -> Result<Notification, SocialError> {
    let row = serde_json::to_value(&draft).map_err(|e| StoreError::Decode(e.to_string()))?;
    let stored = store.insert(Table::Notifications, row).await?;
    Ok(decode_row(stored)?)
}
