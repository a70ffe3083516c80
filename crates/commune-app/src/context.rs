//! Backend handles shared by every command.

use std::sync::Arc;
use std::time::Duration;

use commune_common::{CommuneError, ConfigError, Toast, ToastQueue};
use commune_config::CommuneConfig;
use commune_social::changes::ChangeFeed;
use commune_social::{
    FileTokenStore, IdentityManager, RealtimeConfig, RealtimeFeed, RemoteStore, RestStore,
    TokenStore,
};

pub struct AppContext {
    pub config: CommuneConfig,
    pub store: Arc<dyn RemoteStore>,
    pub identity: IdentityManager,
    pub toasts: ToastQueue,
    feed: Option<Arc<dyn ChangeFeed>>,
    realtime: Option<Arc<RealtimeFeed>>,
}

impl AppContext {
    /// Connect to the configured backend and resolve the stored identity.
    pub async fn connect(config: CommuneConfig) -> Result<Self, CommuneError> {
        if !config.backend.is_configured() {
            return Err(ConfigError::ValidationError(
                "backend.project_ref (or base_url) and backend.api_key are required".into(),
            )
            .into());
        }
        let store: Arc<dyn RemoteStore> = Arc::new(RestStore::new(
            config.backend.rest_url(),
            config.backend.api_key.clone(),
            Duration::from_secs(u64::from(config.backend.request_timeout_secs)),
        ));
        let path = FileTokenStore::default_path()
            .ok_or_else(|| CommuneError::Other("no platform data directory".into()))?;
        let tokens: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(path));
        Ok(Self::with_backend(config, store, None, tokens).await)
    }

    /// Build a context over explicit backends. A `None` feed is opened
    /// lazily from the config on first use.
    pub async fn with_backend(
        config: CommuneConfig,
        store: Arc<dyn RemoteStore>,
        feed: Option<Arc<dyn ChangeFeed>>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        let identity = IdentityManager::init(Arc::clone(&store), tokens).await;
        Self {
            config,
            store,
            identity,
            toasts: ToastQueue::default(),
            feed,
            realtime: None,
        }
    }

    /// The change feed, connecting the realtime socket if needed.
    pub fn feed(&mut self) -> Arc<dyn ChangeFeed> {
        if let Some(feed) = &self.feed {
            return Arc::clone(feed);
        }
        let realtime = Arc::new(RealtimeFeed::connect(RealtimeConfig {
            url: self.config.backend.realtime_url(),
            access_token: None,
            heartbeat_interval_secs: u64::from(self.config.realtime.heartbeat_interval),
            reconnect_delay_secs: u64::from(self.config.realtime.reconnect_delay),
            max_reconnect_delay_secs: u64::from(self.config.realtime.max_reconnect_delay),
        }));
        let feed: Arc<dyn ChangeFeed> = realtime.clone();
        self.realtime = Some(realtime);
        self.feed = Some(Arc::clone(&feed));
        feed
    }

    /// Report a failed operation to the user.
    pub fn report(&mut self, title: &str, err: &CommuneError) {
        tracing::warn!(error = %err, "{title}");
        self.toasts.push(Toast::error(title, err.to_string()));
    }

    /// Close the realtime socket, if one was opened.
    pub async fn shutdown(&self) {
        if let Some(realtime) = &self.realtime {
            realtime.disconnect().await;
        }
    }
}
