use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use commune_common::SessionId;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::geo::{GeoLocation, GeoLocator};
use super::types::PresenceSettings;
use crate::changes::{ChangeFeed, ChangeFilter, RowChange};
use crate::error::SocialError;
use crate::model::ActiveVisitor;
use crate::scope::ScopedChannel;
use crate::store::{Query, RemoteStore, StoreError, Table};

/// What this session reports on every heartbeat.
#[derive(Debug, Clone)]
struct Beacon {
    page_path: String,
    user_id: Option<String>,
    location: GeoLocation,
}

impl Beacon {
    fn row(&self, session_id: &SessionId) -> ActiveVisitor {
        ActiveVisitor {
            session_id: session_id.to_string(),
            page_path: self.page_path.clone(),
            last_seen: Utc::now(),
            country: self.location.country.clone(),
            region: self.location.region.clone(),
            city: self.location.city.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

/// Shared between the session handle and its background tasks.
struct Heartbeat {
    store: Arc<dyn RemoteStore>,
    session_id: SessionId,
    beacon: RwLock<Beacon>,
    count_tx: watch::Sender<u64>,
    stale_after: Duration,
}

impl Heartbeat {
    async fn beat(&self) -> Result<(), StoreError> {
        let visitor = self.beacon.read().await.row(&self.session_id);
        let row = serde_json::to_value(&visitor).map_err(|e| StoreError::Decode(e.to_string()))?;
        self.store
            .upsert(Table::ActiveVisitors, row, "session_id")
            .await
    }

    async fn recount(&self, token: &CancellationToken) {
        match self.store.count(&Query::table(Table::ActiveVisitors)).await {
            Ok(n) if !token.is_cancelled() => {
                self.count_tx.send_replace(n);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to count active visitors"),
        }
    }

    async fn sweep(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.stale_after).unwrap_or(chrono::Duration::zero());
        let query = Query::table(Table::ActiveVisitors).lt("last_seen", cutoff.to_rfc3339());
        if let Err(e) = self.store.delete(&query).await {
            warn!(error = %e, "Failed to sweep stale visitors");
        }
    }

    async fn remove_own_row(&self) {
        let query = Query::table(Table::ActiveVisitors).eq("session_id", self.session_id.as_str());
        match self.store.delete(&query).await {
            Ok(()) => debug!(session_id = %self.session_id, "Presence row removed"),
            Err(e) => warn!(session_id = %self.session_id, error = %e, "Failed to remove presence row"),
        }
    }
}

/// One visitor session: keeps its presence row fresh and tracks how many
/// visitors are active.
pub struct VisitorPresence {
    heartbeat: Arc<Heartbeat>,
    count_rx: watch::Receiver<u64>,
    scope: ScopedChannel,
    closed: bool,
}

impl VisitorPresence {
    /// Announce this session and start the heartbeat and sweep timers.
    ///
    /// The returned receiver carries the active-visitor count.
    pub async fn start(
        store: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        geo: &dyn GeoLocator,
        page_path: &str,
        user_id: Option<&str>,
        settings: PresenceSettings,
    ) -> Result<(Self, watch::Receiver<u64>), SocialError> {
        let session_id = SessionId::new();
        let location = geo.locate().await.unwrap_or_default();
        let (count_tx, count_rx) = watch::channel(0);

        let heartbeat = Arc::new(Heartbeat {
            store,
            session_id: session_id.clone(),
            beacon: RwLock::new(Beacon {
                page_path: page_path.to_string(),
                user_id: user_id.map(str::to_string),
                location,
            }),
            count_tx,
            stale_after: settings.stale_after,
        });

        heartbeat.beat().await?;
        let token = CancellationToken::new();
        heartbeat.recount(&token).await;
        heartbeat.sweep().await;

        let channel = format!("active_visitors:{session_id}");
        let changes = match feed
            .subscribe(&channel, ChangeFilter::all(Table::ActiveVisitors))
            .await
        {
            Ok(changes) => changes,
            Err(e) => {
                heartbeat.remove_own_row().await;
                return Err(e.into());
            }
        };
        let mut scope = ScopedChannel::new(channel, feed);
        let token = scope.token();

        scope.track(tokio::spawn(run_timer(
            settings.heartbeat_interval,
            token.clone(),
            Arc::clone(&heartbeat),
            Tick::Heartbeat,
        )));
        scope.track(tokio::spawn(run_timer(
            settings.sweep_interval,
            token.clone(),
            Arc::clone(&heartbeat),
            Tick::Sweep,
        )));
        scope.track(tokio::spawn(watch_changes(
            changes,
            Arc::clone(&heartbeat),
            token,
        )));

        info!(session_id = %session_id, path = %page_path, "Presence started");
        Ok((
            Self {
                heartbeat,
                count_rx: count_rx.clone(),
                scope,
                closed: false,
            },
            count_rx,
        ))
    }

    pub fn session_id(&self) -> &SessionId {
        &self.heartbeat.session_id
    }

    /// Latest known number of active visitors.
    pub fn visitor_count(&self) -> u64 {
        *self.count_rx.borrow()
    }

    /// Record a route change and refresh the row right away.
    pub async fn update_path(&self, page_path: &str) -> Result<(), SocialError> {
        if self.closed || self.scope.is_released() {
            return Err(SocialError::Closed);
        }
        self.heartbeat.beacon.write().await.page_path = page_path.to_string();
        self.heartbeat.beat().await?;
        Ok(())
    }

    /// Stop the timers, release the channel, and delete this session's row.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.scope.release().await;
        self.heartbeat.remove_own_row().await;
        info!(session_id = %self.heartbeat.session_id, "Presence stopped");
    }
}

impl Drop for VisitorPresence {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let heartbeat = Arc::clone(&self.heartbeat);
            handle.spawn(async move {
                heartbeat.remove_own_row().await;
            });
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Tick {
    Heartbeat,
    Sweep,
}

async fn run_timer(
    period: Duration,
    token: CancellationToken,
    heartbeat: Arc<Heartbeat>,
    tick: Tick,
) {
    let period = period.max(Duration::from_secs(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }
        match tick {
            Tick::Heartbeat => {
                if let Err(e) = heartbeat.beat().await {
                    warn!(error = %e, "Presence heartbeat failed");
                }
            }
            Tick::Sweep => heartbeat.sweep().await,
        }
    }
}

async fn watch_changes(
    mut changes: mpsc::Receiver<RowChange>,
    heartbeat: Arc<Heartbeat>,
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
        debug!(kind = ?change.kind, "Visitor change");
        heartbeat.recount(&token).await;
    }
}
