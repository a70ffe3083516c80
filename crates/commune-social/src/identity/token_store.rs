//! Local persistence of the opaque session token.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SocialError;

/// Storage for the one token this client holds.
pub trait TokenStore: Send + Sync {
    /// The stored token, if any. Unreadable storage counts as no token.
    fn load(&self) -> Option<String>;

    fn save(&self, token: &str) -> Result<(), SocialError>;

    fn clear(&self) -> Result<(), SocialError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenFile {
    token: String,
    saved_at: DateTime<Utc>,
}

/// Token persisted as JSON in a single file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_dir>/commune/session.json`, or `None` when the platform has no data dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("commune").join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<String> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read session file");
                return None;
            }
        };
        match serde_json::from_str::<TokenFile>(&content) {
            Ok(file) if !file.token.trim().is_empty() => Some(file.token),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring malformed session file");
                None
            }
        }
    }

    fn save(&self, token: &str) -> Result<(), SocialError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| SocialError::Storage(e.to_string()))?;
        }
        let file = TokenFile {
            token: token.to_string(),
            saved_at: Utc::now(),
        };
        let json =
            serde_json::to_string_pretty(&file).map_err(|e| SocialError::Storage(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| SocialError::Storage(e.to_string()))?;
        debug!(path = %self.path.display(), "Session token saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), SocialError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SocialError::Storage(e.to_string())),
        }
    }
}

/// Process-local token storage.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn save(&self, token: &str) -> Result<(), SocialError> {
        *self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), SocialError> {
        *self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}
