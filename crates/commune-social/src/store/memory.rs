//! In-process backend implementing both [`RemoteStore`] and [`ChangeFeed`].
//!
//! Evaluates the same filter language as the REST API, fills the defaults
//! the database would (`id`, `created_at`), and publishes row changes to
//! matching subscriptions. Every call is recorded so tests can assert on
//! exactly which remote operations a hook issued.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::query::render_value;
use super::{Filter, Query, RemoteStore, Row, StoreError, Table};
use crate::changes::{ChangeFeed, ChangeFilter, ChangeKind, RowChange};

/// Operation recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Select,
    Count,
    Insert,
    Upsert,
    Update,
    Delete,
}

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub table: Table,
    pub filters: Vec<Filter>,
    pub payload: Value,
}

struct Subscription {
    filter: ChangeFilter,
    tx: mpsc::Sender<RowChange>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<Table, Vec<Row>>,
    subscriptions: HashMap<String, Subscription>,
    calls: Vec<StoreCall>,
    failing: HashSet<Table>,
    subscribe_failing: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert rows directly, without recording calls or publishing changes.
    pub fn seed(&self, table: Table, rows: Vec<Row>) {
        let mut inner = self.lock();
        let stored = inner.tables.entry(table).or_default();
        for row in rows {
            stored.push(with_defaults(table, row));
        }
    }

    /// Current contents of a table.
    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Number of calls of `op` against `table`.
    pub fn call_count(&self, op: StoreOp, table: Table) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op && c.table == table)
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make every operation on `table` fail until reset.
    pub fn set_failing(&self, table: Table, failing: bool) {
        let mut inner = self.lock();
        if failing {
            inner.failing.insert(table);
        } else {
            inner.failing.remove(&table);
        }
    }

    /// Make every `subscribe` fail until reset.
    pub fn set_subscribe_failing(&self, failing: bool) {
        self.lock().subscribe_failing = failing;
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.lock().subscriptions.contains_key(channel)
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Publish a change as if another client had written it.
    pub fn push_change(&self, change: RowChange) {
        self.lock().publish(change);
    }

    fn begin(
        &self,
        op: StoreOp,
        table: Table,
        filters: &[Filter],
        payload: &Value,
    ) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let mut inner = self.lock();
        inner.calls.push(StoreCall {
            op,
            table,
            filters: filters.to_vec(),
            payload: payload.clone(),
        });
        if inner.failing.contains(&table) {
            return Err(StoreError::Unavailable(format!(
                "{} is failing",
                table.name()
            )));
        }
        Ok(inner)
    }
}

impl Inner {
    fn publish(&mut self, change: RowChange) {
        self.subscriptions.retain(|_, sub| !sub.tx.is_closed());
        for sub in self.subscriptions.values() {
            if sub.filter.accepts(&change) {
                let _ = sub.tx.try_send(change.clone());
            }
        }
    }

    fn matching(&self, query: &Query) -> Vec<Row> {
        let mut rows: Vec<Row> = self
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| query.filters.iter().all(|f| matches(f, r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_nulls_last(field(a, &order.column), field(b, &order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        rows
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let inner = self.begin(StoreOp::Select, query.table, &query.filters, &Value::Null)?;
        let rows = inner.matching(query);
        Ok(rows
            .into_iter()
            .map(|r| project(r, &query.columns))
            .collect())
    }

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        let inner = self.begin(StoreOp::Count, query.table, &query.filters, &Value::Null)?;
        let unlimited = Query {
            limit: None,
            order: None,
            ..query.clone()
        };
        Ok(inner.matching(&unlimited).len() as u64)
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row, StoreError> {
        let mut inner = self.begin(StoreOp::Insert, table, &[], &row)?;
        let row = with_defaults(table, row);
        if let Some(key) = primary_key(table) {
            let id = field(&row, key).clone();
            let exists = inner
                .tables
                .get(&table)
                .is_some_and(|rows| rows.iter().any(|r| field(r, key) == &id));
            if exists {
                return Err(StoreError::Http {
                    status: 409,
                    body: format!("duplicate key value violates unique constraint on {key}"),
                });
            }
        }
        inner.tables.entry(table).or_default().push(row.clone());
        inner.publish(RowChange {
            kind: ChangeKind::Insert,
            table: table.name().to_string(),
            record: row.clone(),
            old_record: Value::Null,
        });
        Ok(row)
    }

    async fn upsert(&self, table: Table, row: Row, on_conflict: &str) -> Result<(), StoreError> {
        let mut inner = self.begin(StoreOp::Upsert, table, &[], &row)?;
        let key = field(&row, on_conflict).clone();
        let rows = inner.tables.entry(table).or_default();
        let change = match rows.iter_mut().find(|r| field(r, on_conflict) == &key) {
            Some(existing) => {
                let old = existing.clone();
                merge(existing, &row);
                RowChange {
                    kind: ChangeKind::Update,
                    table: table.name().to_string(),
                    record: existing.clone(),
                    old_record: old,
                }
            }
            None => {
                let row = with_defaults(table, row);
                rows.push(row.clone());
                RowChange {
                    kind: ChangeKind::Insert,
                    table: table.name().to_string(),
                    record: row,
                    old_record: Value::Null,
                }
            }
        };
        inner.publish(change);
        Ok(())
    }

    async fn update(&self, query: &Query, patch: Row) -> Result<Vec<Row>, StoreError> {
        let mut inner = self.begin(StoreOp::Update, query.table, &query.filters, &patch)?;
        let mut changes = Vec::new();
        if let Some(rows) = inner.tables.get_mut(&query.table) {
            for row in rows
                .iter_mut()
                .filter(|r| query.filters.iter().all(|f| matches(f, r)))
            {
                let old = row.clone();
                merge(row, &patch);
                changes.push(RowChange {
                    kind: ChangeKind::Update,
                    table: query.table.name().to_string(),
                    record: row.clone(),
                    old_record: old,
                });
            }
        }
        let updated = changes.iter().map(|c| c.record.clone()).collect();
        for change in changes {
            inner.publish(change);
        }
        Ok(updated)
    }

    async fn delete(&self, query: &Query) -> Result<(), StoreError> {
        let mut inner = self.begin(StoreOp::Delete, query.table, &query.filters, &Value::Null)?;
        let mut removed = Vec::new();
        if let Some(rows) = inner.tables.get_mut(&query.table) {
            rows.retain(|r| {
                if query.filters.iter().all(|f| matches(f, r)) {
                    removed.push(r.clone());
                    false
                } else {
                    true
                }
            });
        }
        for old in removed {
            inner.publish(RowChange {
                kind: ChangeKind::Delete,
                table: query.table.name().to_string(),
                record: Value::Null,
                old_record: old,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MemoryStore {
    async fn subscribe(
        &self,
        channel: &str,
        filter: ChangeFilter,
    ) -> Result<mpsc::Receiver<RowChange>, StoreError> {
        let mut inner = self.lock();
        if inner.subscribe_failing {
            return Err(StoreError::Realtime("connection closed".into()));
        }
        let (tx, rx) = mpsc::channel(256);
        inner
            .subscriptions
            .insert(channel.to_string(), Subscription { filter, tx });
        Ok(rx)
    }

    async fn unsubscribe(&self, channel: &str) {
        self.lock().subscriptions.remove(channel);
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn primary_key(table: Table) -> Option<&'static str> {
    match table {
        Table::ActiveVisitors => Some("session_id"),
        Table::UserFollows => None,
        _ => Some("id"),
    }
}

fn with_defaults(table: Table, row: Row) -> Row {
    let mut obj = match row {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if primary_key(table) == Some("id") && !obj.contains_key("id") {
        obj.insert("id".into(), Value::String(commune_common::new_id()));
    }
    if !obj.contains_key("created_at") {
        obj.insert("created_at".into(), Value::String(Utc::now().to_rfc3339()));
    }
    Value::Object(obj)
}

fn merge(target: &mut Row, patch: &Row) {
    if let (Value::Object(t), Value::Object(p)) = (target, patch) {
        for (k, v) in p {
            t.insert(k.clone(), v.clone());
        }
    }
}

fn project(row: Row, columns: &str) -> Row {
    if columns.trim() == "*" {
        return row;
    }
    let wanted: Vec<&str> = columns.split(',').map(str::trim).collect();
    match row {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| wanted.contains(&k.as_str()))
                .collect(),
        ),
        other => other,
    }
}

fn field<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&Value::Null)
}

fn parse_time(value: &Value) -> Option<DateTime<FixedOffset>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => match (parse_time(a), parse_time(b)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => Some(render_value(a).cmp(&render_value(b))),
        },
    }
}

fn compare_nulls_last(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => compare(a, b).unwrap_or(Ordering::Equal),
    }
}

fn matches(filter: &Filter, row: &Row) -> bool {
    match filter {
        Filter::Eq(col, v) => compare(field(row, col), v) == Some(Ordering::Equal),
        Filter::Neq(col, v) => matches!(
            compare(field(row, col), v),
            Some(Ordering::Less | Ordering::Greater)
        ),
        Filter::Lt(col, v) => compare(field(row, col), v) == Some(Ordering::Less),
        Filter::Gt(col, v) => compare(field(row, col), v) == Some(Ordering::Greater),
        Filter::IsNull(col) => field(row, col).is_null(),
        Filter::Or(items) => items.iter().any(|f| matches(f, row)),
        Filter::And(items) => items.iter().all(|f| matches(f, row)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_fills_defaults_and_select_filters() {
        let store = MemoryStore::new();
        let row = store
            .insert(Table::Notifications, json!({"user_id": "u1", "is_read": false}))
            .await
            .unwrap();
        assert!(row.get("id").is_some());
        assert!(row.get("created_at").is_some());

        store
            .insert(Table::Notifications, json!({"user_id": "u2", "is_read": false}))
            .await
            .unwrap();

        let rows = store
            .select(&Query::table(Table::Notifications).eq("user_id", "u1"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["user_id"], "u1");
    }

    #[tokio::test]
    async fn ordering_limit_and_timestamps() {
        let store = MemoryStore::new();
        store.seed(
            Table::Messages,
            vec![
                json!({"id": "m1", "created_at": "2024-01-01T10:00:00+00:00"}),
                json!({"id": "m3", "created_at": "2024-01-01T12:00:00Z"}),
                json!({"id": "m2", "created_at": "2024-01-01T11:00:00+00:00"}),
            ],
        );
        let rows = store
            .select(&Query::table(Table::Messages).order_desc("created_at").limit(2))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["m3", "m2"]);

        let older = store
            .count(&Query::table(Table::Messages).lt("created_at", "2024-01-01T11:30:00Z"))
            .await
            .unwrap();
        assert_eq!(older, 2);
    }

    #[tokio::test]
    async fn neq_excludes_nulls_and_or_groups_match() {
        let store = MemoryStore::new();
        store.seed(
            Table::Conversations,
            vec![
                json!({"id": "c1", "participant_1": "a", "participant_2": "b"}),
                json!({"id": "c2", "participant_1": "c", "participant_2": "a"}),
                json!({"id": "c3", "participant_1": "c", "participant_2": null}),
            ],
        );
        let rows = store
            .select(&Query::table(Table::Conversations).or(vec![
                Filter::eq("participant_1", "a"),
                Filter::eq("participant_2", "a"),
            ]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let n = store
            .count(&Query::table(Table::Conversations).neq("participant_2", "a"))
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn upsert_merges_by_key_and_publishes() {
        let store = MemoryStore::new();
        let mut rx = store
            .subscribe("visitors", ChangeFilter::all(Table::ActiveVisitors))
            .await
            .unwrap();

        store
            .upsert(Table::ActiveVisitors, json!({"session_id": "s1", "page_path": "/"}), "session_id")
            .await
            .unwrap();
        store
            .upsert(Table::ActiveVisitors, json!({"session_id": "s1", "page_path": "/blog"}), "session_id")
            .await
            .unwrap();

        let rows = store.rows(Table::ActiveVisitors);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["page_path"], "/blog");

        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Insert);
        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Update);
    }

    #[tokio::test]
    async fn failing_tables_still_record_calls() {
        let store = MemoryStore::new();
        store.set_failing(Table::Messages, true);
        let err = store
            .insert(Table::Messages, json!({"content": "hi"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.call_count(StoreOp::Insert, Table::Messages), 1);
        assert!(store.rows(Table::Messages).is_empty());
    }

    #[tokio::test]
    async fn duplicate_primary_key_conflicts() {
        let store = MemoryStore::new();
        store
            .insert(Table::UserProfiles, json!({"id": "p1"}))
            .await
            .unwrap();
        let err = store
            .insert(Table::UserProfiles, json!({"id": "p1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Http { status: 409, .. }));
    }

    #[tokio::test]
    async fn projection_keeps_requested_columns() {
        let store = MemoryStore::new();
        store.seed(
            Table::UserProfiles,
            vec![json!({"id": "p1", "display_name": "Ana", "session_token": "t"})],
        );
        let rows = store
            .select(&Query::table(Table::UserProfiles).select("id, display_name"))
            .await
            .unwrap();
        assert!(rows[0].get("session_token").is_none());
        assert_eq!(rows[0]["display_name"], "Ana");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let store = MemoryStore::new();
        let mut rx = store
            .subscribe("n", ChangeFilter::inserts(Table::Notifications))
            .await
            .unwrap();
        assert!(store.is_subscribed("n"));
        store.unsubscribe("n").await;
        assert_eq!(store.subscription_count(), 0);

        store
            .insert(Table::Notifications, json!({"user_id": "u1"}))
            .await
            .unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn failing_subscribe_registers_nothing() {
        let store = MemoryStore::new();
        store.set_subscribe_failing(true);
        let err = store
            .subscribe("n", ChangeFilter::inserts(Table::Notifications))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Realtime(_)));
        assert_eq!(store.subscription_count(), 0);
    }
}
