//! Lifetime of one realtime channel and the tasks consuming it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::changes::ChangeFeed;

/// Channel name for one hook instance: `base` plus a fresh suffix, so two
/// hooks watching the same rows never share a route.
pub(crate) fn instance_channel(base: &str) -> String {
    format!("{base}:{}", commune_common::new_id())
}

/// Owns a subscribed channel, its cancellation token, and its background
/// tasks. `release` tears everything down; dropping does the same
/// best-effort.
pub(crate) struct ScopedChannel {
    channel: String,
    feed: Arc<dyn ChangeFeed>,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    released: bool,
}

impl ScopedChannel {
    pub(crate) fn new(channel: impl Into<String>, feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            channel: channel.into(),
            feed,
            token: CancellationToken::new(),
            tasks: Vec::new(),
            released: false,
        }
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released || self.token.is_cancelled()
    }

    pub(crate) fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Cancel tasks and unsubscribe. Idempotent.
    pub(crate) async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.token.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.feed.unsubscribe(&self.channel).await;
        debug!(channel = %self.channel, "Channel released");
    }
}

impl Drop for ScopedChannel {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.token.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let feed = Arc::clone(&self.feed);
            let channel = std::mem::take(&mut self.channel);
            handle.spawn(async move {
                feed.unsubscribe(&channel).await;
            });
        }
    }
}
