//! Access to the hosted backend's auto-generated table API.
//!
//! Every hook talks to the backend through [`RemoteStore`], so the same
//! logic runs against the REST API in production and against the
//! in-process [`memory::MemoryStore`] in tests.

#[cfg(any(test, feature = "memory-store"))]
pub mod memory;
pub(crate) mod query;
mod rest;

pub use query::{Filter, Order, Query};
pub use rest::RestStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// A raw table row as returned by the backend.
pub type Row = serde_json::Value;

/// Tables consumed by the client. The schema itself is owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    UserProfiles,
    Notifications,
    Conversations,
    Messages,
    ActiveVisitors,
    UserFollows,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::UserProfiles => "user_profiles",
            Table::Notifications => "notifications",
            Table::Conversations => "conversations",
            Table::Messages => "messages",
            Table::ActiveVisitors => "active_visitors",
            Table::UserFollows => "user_follows",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "user_profiles" => Table::UserProfiles,
            "notifications" => Table::Notifications,
            "conversations" => Table::Conversations,
            "messages" => Table::Messages,
            "active_visitors" => Table::ActiveVisitors,
            "user_follows" => Table::UserFollows,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("realtime error: {0}")]
    Realtime(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Row-level operations against the backend's tables.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch rows matching the query.
    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Exact number of rows matching the query's filters.
    async fn count(&self, query: &Query) -> Result<u64, StoreError>;

    /// Insert one row and return it as stored (with server defaults filled in).
    async fn insert(&self, table: Table, row: Row) -> Result<Row, StoreError>;

    /// Insert or merge one row keyed by the `on_conflict` column.
    async fn upsert(&self, table: Table, row: Row, on_conflict: &str) -> Result<(), StoreError>;

    /// Apply `patch` to every row matching the query, returning the updated rows.
    async fn update(&self, query: &Query, patch: Row) -> Result<Vec<Row>, StoreError>;

    /// Delete every row matching the query.
    async fn delete(&self, query: &Query) -> Result<(), StoreError>;
}

pub(crate) fn decode_row<T: DeserializeOwned>(row: Row) -> Result<T, StoreError> {
    serde_json::from_value(row).map_err(|e| StoreError::Decode(e.to_string()))
}

pub(crate) fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, StoreError> {
    rows.into_iter().map(decode_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_round_trip() {
        for table in [
            Table::UserProfiles,
            Table::Notifications,
            Table::Conversations,
            Table::Messages,
            Table::ActiveVisitors,
            Table::UserFollows,
        ] {
            assert_eq!(Table::from_name(table.name()), Some(table));
        }
        assert_eq!(Table::from_name("posts"), None);
    }

    #[test]
    fn decode_reports_bad_rows() {
        #[derive(Debug, serde::Deserialize)]
        struct Strict {
            #[allow(dead_code)]
            id: String,
        }
        let err = decode_row::<Strict>(serde_json::json!({"id": 5})).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }
}
