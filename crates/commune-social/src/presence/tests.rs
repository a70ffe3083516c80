use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::*;
use crate::error::SocialError;
use crate::store::memory::{MemoryStore, StoreOp};
use crate::store::{Query, RemoteStore, Table};

struct FixedGeo;

#[async_trait]
impl GeoLocator for FixedGeo {
    async fn locate(&self) -> Option<GeoLocation> {
        Some(GeoLocation {
            country: Some("Portugal".into()),
            region: Some("Lisbon".into()),
            city: Some("Lisbon".into()),
        })
    }
}

async fn start(store: &Arc<MemoryStore>, path: &str) -> (VisitorPresence, tokio::sync::watch::Receiver<u64>) {
    VisitorPresence::start(
        store.clone(),
        store.clone(),
        &NoGeoLocator,
        path,
        None,
        PresenceSettings::default(),
    )
    .await
    .unwrap()
}

fn own_rows(store: &MemoryStore, presence: &VisitorPresence) -> Vec<serde_json::Value> {
    store
        .rows(Table::ActiveVisitors)
        .into_iter()
        .filter(|r| r["session_id"] == presence.session_id().as_str())
        .collect()
}

#[tokio::test]
async fn start_announces_one_row_and_close_removes_it() {
    let store = Arc::new(MemoryStore::new());
    store.seed(
        Table::ActiveVisitors,
        vec![json!({"session_id": "other", "page_path": "/", "last_seen": Utc::now().to_rfc3339()})],
    );

    let (mut presence, counts) = start(&store, "/blog").await;
    let rows = own_rows(&store, &presence);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["page_path"], "/blog");
    assert_eq!(*counts.borrow(), 2);
    assert_eq!(presence.visitor_count(), 2);
    let channel = format!("active_visitors:{}", presence.session_id());
    assert!(store.is_subscribed(&channel));

    presence.close().await;
    assert!(own_rows(&store, &presence).is_empty());
    assert!(!store.is_subscribed(&channel));
    assert_eq!(store.rows(Table::ActiveVisitors).len(), 1);

    // Closing twice does nothing more.
    let deletes = store.call_count(StoreOp::Delete, Table::ActiveVisitors);
    presence.close().await;
    assert_eq!(store.call_count(StoreOp::Delete, Table::ActiveVisitors), deletes);
}

#[tokio::test]
async fn stale_rows_are_swept_on_start() {
    let store = Arc::new(MemoryStore::new());
    let old = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
    store.seed(
        Table::ActiveVisitors,
        vec![
            json!({"session_id": "stale", "page_path": "/", "last_seen": old}),
            json!({"session_id": "fresh", "page_path": "/", "last_seen": Utc::now().to_rfc3339()}),
        ],
    );
    let (_presence, _counts) = start(&store, "/").await;
    let ids: Vec<_> = store
        .rows(Table::ActiveVisitors)
        .into_iter()
        .map(|r| r["session_id"].as_str().unwrap().to_string())
        .collect();
    assert!(!ids.contains(&"stale".to_string()));
    assert!(ids.contains(&"fresh".to_string()));
}

#[tokio::test(start_paused = true)]
async fn timers_repeat_until_close() {
    let store = Arc::new(MemoryStore::new());
    let (mut presence, _counts) = start(&store, "/").await;
    assert_eq!(store.call_count(StoreOp::Upsert, Table::ActiveVisitors), 1);
    assert_eq!(store.call_count(StoreOp::Delete, Table::ActiveVisitors), 1);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(store.call_count(StoreOp::Upsert, Table::ActiveVisitors), 3);
    assert_eq!(store.call_count(StoreOp::Delete, Table::ActiveVisitors), 2);
    assert_eq!(own_rows(&store, &presence).len(), 1);

    presence.close().await;
    let upserts = store.call_count(StoreOp::Upsert, Table::ActiveVisitors);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(store.call_count(StoreOp::Upsert, Table::ActiveVisitors), upserts);
}

#[tokio::test]
async fn count_follows_other_visitors() {
    let store = Arc::new(MemoryStore::new());
    let (_presence, mut counts) = start(&store, "/").await;
    assert_eq!(*counts.borrow_and_update(), 1);

    store
        .upsert(
            Table::ActiveVisitors,
            json!({"session_id": "s2", "page_path": "/events", "last_seen": Utc::now().to_rfc3339()}),
            "session_id",
        )
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), counts.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*counts.borrow(), 2);
}

#[tokio::test]
async fn count_drops_when_a_visitor_leaves() {
    let store = Arc::new(MemoryStore::new());
    let (_presence, mut counts) = start(&store, "/").await;
    store
        .upsert(
            Table::ActiveVisitors,
            json!({"session_id": "s2", "page_path": "/", "last_seen": Utc::now().to_rfc3339()}),
            "session_id",
        )
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), counts.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*counts.borrow_and_update(), 2);

    store
        .delete(&Query::table(Table::ActiveVisitors).eq("session_id", "s2"))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), counts.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*counts.borrow(), 1);
}

#[tokio::test]
async fn visitor_update_triggers_recount() {
    let store = Arc::new(MemoryStore::new());
    store.seed(
        Table::ActiveVisitors,
        vec![json!({"session_id": "s2", "page_path": "/", "last_seen": Utc::now().to_rfc3339()})],
    );
    let (_presence, _counts) = start(&store, "/").await;
    let counts_before = store.call_count(StoreOp::Count, Table::ActiveVisitors);

    store
        .update(
            &Query::table(Table::ActiveVisitors).eq("session_id", "s2"),
            json!({"page_path": "/events"}),
        )
        .await
        .unwrap();
    for _ in 0..10 {
        if store.call_count(StoreOp::Count, Table::ActiveVisitors) > counts_before {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(store.call_count(StoreOp::Count, Table::ActiveVisitors) > counts_before);
}

#[tokio::test]
async fn failed_subscribe_removes_announced_row() {
    let store = Arc::new(MemoryStore::new());
    store.set_subscribe_failing(true);
    let result = VisitorPresence::start(
        store.clone(),
        store.clone(),
        &NoGeoLocator,
        "/",
        None,
        PresenceSettings::default(),
    )
    .await;
    assert!(matches!(result, Err(SocialError::Store(_))));
    assert_eq!(store.call_count(StoreOp::Upsert, Table::ActiveVisitors), 1);
    assert!(store.rows(Table::ActiveVisitors).is_empty());
}

#[tokio::test]
async fn failed_announce_is_an_error() {
    let store = Arc::new(MemoryStore::new());
    store.set_failing(Table::ActiveVisitors, true);
    let result = VisitorPresence::start(
        store.clone(),
        store.clone(),
        &NoGeoLocator,
        "/",
        None,
        PresenceSettings::default(),
    )
    .await;
    assert!(matches!(result, Err(SocialError::Store(_))));
    assert_eq!(store.subscription_count(), 0);
}

#[tokio::test]
async fn location_and_user_are_recorded() {
    let store = Arc::new(MemoryStore::new());
    let (presence, _counts) = VisitorPresence::start(
        store.clone(),
        store.clone(),
        &FixedGeo,
        "/",
        Some("u1"),
        PresenceSettings::default(),
    )
    .await
    .unwrap();
    let row = &own_rows(&store, &presence)[0];
    assert_eq!(row["country"], "Portugal");
    assert_eq!(row["city"], "Lisbon");
    assert_eq!(row["user_id"], "u1");
}

#[tokio::test]
async fn update_path_upserts_immediately() {
    let store = Arc::new(MemoryStore::new());
    let (mut presence, _counts) = start(&store, "/").await;
    presence.update_path("/events/42").await.unwrap();
    assert_eq!(own_rows(&store, &presence)[0]["page_path"], "/events/42");
    assert_eq!(store.rows(Table::ActiveVisitors).len(), 1);

    presence.close().await;
    assert!(matches!(
        presence.update_path("/late").await,
        Err(SocialError::Closed)
    ));
}

#[tokio::test]
async fn drop_without_close_removes_row() {
    let store = Arc::new(MemoryStore::new());
    let (presence, _counts) = start(&store, "/").await;
    drop(presence);
    for _ in 0..10 {
        if store.rows(Table::ActiveVisitors).is_empty() && store.subscription_count() == 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(store.rows(Table::ActiveVisitors).is_empty());
    assert_eq!(store.subscription_count(), 0);
}
