//! Follow relationship between the current identity and one target profile.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::SocialError;
use crate::model::{FollowEdge, NotificationDraft, NotificationKind, UserProfile};
use crate::notifications::send_notification;
use crate::store::{Query, RemoteStore, StoreError, Table};

/// Clears the busy flag when the toggle finishes, however it finishes.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct FollowState {
    store: Arc<dyn RemoteStore>,
    me: Option<UserProfile>,
    target: String,
    following: RwLock<bool>,
    busy: AtomicBool,
}

impl FollowState {
    /// Derive the follow state of `me` towards `target` from the backend.
    pub async fn load(
        store: Arc<dyn RemoteStore>,
        me: Option<UserProfile>,
        target: &str,
    ) -> Result<Self, SocialError> {
        let state = Self {
            store,
            me,
            target: target.to_string(),
            following: RwLock::new(false),
            busy: AtomicBool::new(false),
        };
        state.refresh().await?;
        Ok(state)
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn is_following(&self) -> bool {
        *self.following.read().await
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Point at another profile and re-derive.
    pub async fn set_target(&mut self, target: &str) -> Result<(), SocialError> {
        self.target = target.to_string();
        self.refresh().await
    }

    /// Re-read the edge from the backend.
    pub async fn refresh(&self) -> Result<(), SocialError> {
        let following = match &self.me {
            Some(me) if me.id != self.target => {
                let rows = self.store.select(&self.edge_query(&me.id).limit(1)).await?;
                !rows.is_empty()
            }
            _ => false,
        };
        *self.following.write().await = following;
        Ok(())
    }

    /// Follow or unfollow. Returns the new state.
    ///
    /// Following also writes one notification to the followed user; if
    /// that write fails the follow stands.
    pub async fn toggle(&self) -> Result<bool, SocialError> {
        let me = self.me.as_ref().ok_or(SocialError::NeedsIdentity)?;
        if me.id == self.target {
            return Err(SocialError::SelfTarget);
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SocialError::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        if *self.following.read().await {
            self.store.delete(&self.edge_query(&me.id)).await?;
            *self.following.write().await = false;
            info!(follower = %me.id, following = %self.target, "Unfollowed");
            return Ok(false);
        }

        let edge = FollowEdge {
            follower_id: me.id.clone(),
            following_id: self.target.clone(),
        };
        let row = serde_json::to_value(&edge).map_err(|e| StoreError::Decode(e.to_string()))?;
        self.store.insert(Table::UserFollows, row).await?;
        *self.following.write().await = true;
        info!(follower = %me.id, following = %self.target, "Followed");

        let draft = NotificationDraft::new(
            &self.target,
            NotificationKind::Follow,
            format!("{} started following you", me.display_name),
        )
        .data(json!({ "follower_id": me.id }));
        match send_notification(self.store.as_ref(), draft).await {
            Ok(n) => debug!(id = %n.id, "Follow notification sent"),
            Err(e) => warn!(target_user = %self.target, error = %e, "Failed to send follow notification"),
        }
        Ok(true)
    }

    fn edge_query(&self, me: &str) -> Query {
        Query::table(Table::UserFollows)
            .eq("follower_id", me)
            .eq("following_id", self.target.as_str())
    }
}

/// Number of profiles following `user_id`.
pub async fn follower_count(store: &dyn RemoteStore, user_id: &str) -> Result<u64, SocialError> {
    Ok(store
        .count(&Query::table(Table::UserFollows).eq("following_id", user_id))
        .await?)
}

/// Number of profiles `user_id` follows.
pub async fn following_count(store: &dyn RemoteStore, user_id: &str) -> Result<u64, SocialError> {
    Ok(store
        .count(&Query::table(Table::UserFollows).eq("follower_id", user_id))
        .await?)
}
