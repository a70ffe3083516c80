use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::token_store::TokenStore;
use crate::error::SocialError;
use crate::model::{Role, UserProfile};
use crate::store::{decode_row, Query, RemoteStore, StoreError, Table};

/// Resolves and holds the profile this client acts as.
pub struct IdentityManager {
    store: Arc<dyn RemoteStore>,
    tokens: Arc<dyn TokenStore>,
    current: RwLock<Option<UserProfile>>,
}

impl IdentityManager {
    /// Resolve the locally stored token, if any. Failure leaves the identity
    /// unresolved rather than erroring.
    pub async fn init(store: Arc<dyn RemoteStore>, tokens: Arc<dyn TokenStore>) -> Self {
        let current = match tokens.load() {
            Some(token) => resolve_token(store.as_ref(), &token).await,
            None => {
                debug!("No stored session token");
                None
            }
        };
        if let Some(profile) = &current {
            info!(user_id = %profile.id, "Identity resolved from stored token");
        }
        Self {
            store,
            tokens,
            current: RwLock::new(current),
        }
    }

    pub async fn current(&self) -> Option<UserProfile> {
        self.current.read().await.clone()
    }

    pub async fn needs_identification(&self) -> bool {
        self.current.read().await.is_none()
    }

    /// Create or re-claim the profile for `email` under a fresh token.
    ///
    /// The previous token of that profile stops resolving. On error the
    /// current identity is left untouched.
    pub async fn identify(
        &self,
        email: &str,
        display_name: &str,
        is_anonymous: bool,
    ) -> Result<UserProfile, SocialError> {
        let email = email.trim().to_lowercase();
        let display_name = display_name.trim();
        if email.is_empty() {
            return Err(SocialError::InvalidInput("email is required".into()));
        }
        if display_name.is_empty() {
            return Err(SocialError::InvalidInput("display name is required".into()));
        }

        let token = commune_common::new_session_token();
        let now = Utc::now().to_rfc3339();

        let existing = self
            .store
            .select(
                &Query::table(Table::UserProfiles)
                    .select("id")
                    .eq("email", email.as_str())
                    .limit(1),
            )
            .await?;

        let row = match existing.first().and_then(|r| r.get("id")).cloned() {
            Some(id) => {
                let patch = json!({
                    "display_name": display_name,
                    "is_anonymous": is_anonymous,
                    "session_token": token,
                    "last_seen_at": now,
                });
                self.store
                    .update(&Query::table(Table::UserProfiles).eq("id", id), patch)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| StoreError::Decode("profile update returned no row".into()))?
            }
            None => {
                let row = json!({
                    "email": email,
                    "display_name": display_name,
                    "is_anonymous": is_anonymous,
                    "role": Role::User,
                    "is_blocked": false,
                    "session_token": token,
                    "last_seen_at": now,
                });
                self.store.insert(Table::UserProfiles, row).await?
            }
        };

        let profile: UserProfile = decode_row(row)?;
        self.tokens.save(&token)?;
        info!(user_id = %profile.id, anonymous = is_anonymous, "Identified");
        *self.current.write().await = Some(profile.clone());
        Ok(profile)
    }

    /// Forget the local token and the resolved identity.
    pub async fn sign_out(&self) -> Result<(), SocialError> {
        self.tokens.clear()?;
        *self.current.write().await = None;
        info!("Signed out");
        Ok(())
    }
}

async fn resolve_token(store: &dyn RemoteStore, token: &str) -> Option<UserProfile> {
    let query = Query::table(Table::UserProfiles)
        .eq("session_token", token)
        .limit(1);
    match store.select(&query).await {
        Ok(rows) => match rows.into_iter().next().map(decode_row::<UserProfile>) {
            Some(Ok(profile)) => Some(profile),
            Some(Err(e)) => {
                warn!(error = %e, "Stored session resolved to an unreadable profile");
                None
            }
            None => {
                debug!("Stored session token no longer resolves");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "Failed to resolve stored session token");
            None
        }
    }
}
