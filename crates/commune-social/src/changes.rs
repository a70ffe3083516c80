//! Row-level change subscriptions.
//!
//! A subscription is a named channel bound to one table and an optional
//! equality filter. It yields a lazy, non-restartable sequence of
//! [`RowChange`]s through an `mpsc::Receiver`; once unsubscribed, the
//! channel name may be reused for a fresh subscription.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::store::query::render_value;
use crate::store::{StoreError, Table};

/// Kind of row change delivered by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// Which change kinds a subscription wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Only(ChangeKind),
}

impl EventFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            EventFilter::All => "*",
            EventFilter::Only(ChangeKind::Insert) => "INSERT",
            EventFilter::Only(ChangeKind::Update) => "UPDATE",
            EventFilter::Only(ChangeKind::Delete) => "DELETE",
        }
    }

    fn accepts(self, kind: ChangeKind) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(k) => k == kind,
        }
    }
}

/// What a channel listens to.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    pub table: Table,
    pub events: EventFilter,
    /// Optional `column = value` restriction.
    pub column_eq: Option<(String, Value)>,
}

impl ChangeFilter {
    pub fn inserts(table: Table) -> Self {
        Self {
            table,
            events: EventFilter::Only(ChangeKind::Insert),
            column_eq: None,
        }
    }

    pub fn all(table: Table) -> Self {
        Self {
            table,
            events: EventFilter::All,
            column_eq: None,
        }
    }

    pub fn where_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.column_eq = Some((column.to_string(), value.into()));
        self
    }

    /// Server-side filter expression, e.g. `user_id=eq.42`.
    pub fn filter_expr(&self) -> Option<String> {
        self.column_eq
            .as_ref()
            .map(|(col, v)| format!("{col}=eq.{}", render_value(v)))
    }

    /// Whether a change belongs to this subscription.
    pub fn accepts(&self, change: &RowChange) -> bool {
        if change.table != self.table.name() || !self.events.accepts(change.kind) {
            return false;
        }
        match &self.column_eq {
            None => true,
            Some((col, expected)) => {
                let row = match change.kind {
                    ChangeKind::Delete => &change.old_record,
                    _ => &change.record,
                };
                row.get(col)
                    .map(|actual| render_value(actual) == render_value(expected))
                    .unwrap_or(false)
            }
        }
    }
}

/// A single row-level change.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChange {
    pub kind: ChangeKind,
    pub table: String,
    /// New row for inserts and updates; `Null` for deletes.
    pub record: Value,
    /// Previous row for updates and deletes, when the backend provides it.
    pub old_record: Value,
}

/// Source of realtime row changes.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open `channel` with the given filter.
    async fn subscribe(
        &self,
        channel: &str,
        filter: ChangeFilter,
    ) -> Result<mpsc::Receiver<RowChange>, StoreError>;

    /// Release `channel`. Unknown channels are ignored.
    async fn unsubscribe(&self, channel: &str);
}
