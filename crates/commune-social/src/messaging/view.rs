use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::changes::{ChangeFeed, ChangeFilter, RowChange};
use crate::error::SocialError;
use crate::model::Message;
use crate::scope::{instance_channel, ScopedChannel};
use crate::store::{decode_row, decode_rows, Query, RemoteStore, Table};

/// An open conversation: full history plus live inbound messages.
pub struct ConversationView {
    store: Arc<dyn RemoteStore>,
    conversation_id: String,
    me: String,
    messages: Arc<RwLock<Vec<Message>>>,
    scope: ScopedChannel,
}

impl ConversationView {
    /// Load the history, mark the counterpart's messages read, and start
    /// listening. Inbound messages are also forwarded on the returned receiver.
    pub async fn open(
        store: Arc<dyn RemoteStore>,
        feed: Arc<dyn ChangeFeed>,
        conversation_id: &str,
        me: &str,
    ) -> Result<(Self, mpsc::Receiver<Message>), SocialError> {
        let channel = instance_channel(&format!("messages:{conversation_id}"));
        let changes = feed
            .subscribe(
                &channel,
                ChangeFilter::inserts(Table::Messages).where_eq("conversation_id", conversation_id),
            )
            .await?;
        let mut scope = ScopedChannel::new(channel, feed);

        let history = Query::table(Table::Messages)
            .eq("conversation_id", conversation_id)
            .order_asc("created_at");
        let mut messages: Vec<Message> = match store.select(&history).await {
            Ok(rows) => decode_rows(rows)?,
            Err(e) => {
                scope.release().await;
                return Err(e.into());
            }
        };

        if messages.iter().any(|m| m.sender_id != me && !m.is_read) {
            let unread = Query::table(Table::Messages)
                .eq("conversation_id", conversation_id)
                .neq("sender_id", me)
                .eq("is_read", false);
            match store.update(&unread, json!({ "is_read": true })).await {
                Ok(_) => {
                    for m in messages.iter_mut().filter(|m| m.sender_id != me) {
                        m.is_read = true;
                    }
                }
                Err(e) => warn!(conversation_id = %conversation_id, error = %e, "Failed to mark messages read"),
            }
        }
        info!(conversation_id = %conversation_id, history = messages.len(), "Conversation opened");

        let messages = Arc::new(RwLock::new(messages));
        let (out_tx, out_rx) = mpsc::channel(64);
        scope.track(tokio::spawn(consume(
            changes,
            Arc::clone(&store),
            me.to_string(),
            Arc::clone(&messages),
            out_tx,
            scope.token(),
        )));

        Ok((
            Self {
                store,
                conversation_id: conversation_id.to_string(),
                me: me.to_string(),
                messages,
                scope,
            },
            out_rx,
        ))
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Messages in arrival order.
    pub async fn messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    /// Send a message with text, an image reference, or both.
    pub async fn send_message(
        &self,
        text: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<Message, SocialError> {
        let content = text.map(str::trim).filter(|t| !t.is_empty());
        let image_url = image_url.map(str::trim).filter(|u| !u.is_empty());
        if content.is_none() && image_url.is_none() {
            return Err(SocialError::EmptyMessage);
        }
        if self.scope.is_released() {
            return Err(SocialError::Closed);
        }

        let row = self
            .store
            .insert(
                Table::Messages,
                json!({
                    "conversation_id": self.conversation_id,
                    "sender_id": self.me,
                    "content": content,
                    "image_url": image_url,
                    "is_read": false,
                }),
            )
            .await?;
        let message: Message = decode_row(row)?;

        let touch = Query::table(Table::Conversations).eq("id", self.conversation_id.as_str());
        let at = message.created_at.to_rfc3339();
        if let Err(e) = self
            .store
            .update(&touch, json!({ "last_message_at": at }))
            .await
        {
            warn!(conversation_id = %self.conversation_id, error = %e, "Failed to touch conversation");
        }

        let mut messages = self.messages.write().await;
        if !messages.iter().any(|m| m.id == message.id) {
            messages.push(message.clone());
        }
        Ok(message)
    }

    pub async fn close(&mut self) {
        self.scope.release().await;
        debug!(conversation_id = %self.conversation_id, "Conversation closed");
    }
}

async fn consume(
    mut changes: mpsc::Receiver<RowChange>,
    store: Arc<dyn RemoteStore>,
    me: String,
    messages: Arc<RwLock<Vec<Message>>>,
    out: mpsc::Sender<Message>,
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
        let mut message: Message = match decode_row(change.record) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable message");
                continue;
            }
        };

        {
            let mut messages = messages.write().await;
            if token.is_cancelled() {
                break;
            }
            if messages.iter().any(|m| m.id == message.id) {
                continue;
            }
            messages.push(message.clone());
        }

        if message.sender_id != me {
            let query = Query::table(Table::Messages).eq("id", message.id.as_str());
            match store.update(&query, json!({ "is_read": true })).await {
                Ok(_) => {
                    message.is_read = true;
                    let mut messages = messages.write().await;
                    if token.is_cancelled() {
                        break;
                    }
                    if let Some(m) = messages.iter_mut().find(|m| m.id == message.id) {
                        m.is_read = true;
                    }
                }
                Err(e) => warn!(id = %message.id, error = %e, "Failed to mark message read"),
            }
        }

        debug!(id = %message.id, sender = %message.sender_id, "Message received");
        let _ = out.try_send(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::get_or_create_conversation;
    use crate::store::memory::{MemoryStore, StoreOp};
    use crate::store::Filter;
    use std::time::Duration;

    fn seed(store: &MemoryStore) {
        store.seed(
            Table::Conversations,
            vec![json!({"id": "c1", "participant_1": "me", "participant_2": "b",
                        "created_at": "2024-04-01T00:00:00Z"})],
        );
        store.seed(
            Table::Messages,
            vec![
                json!({"id": "m2", "conversation_id": "c1", "sender_id": "me", "content": "reply",
                       "is_read": false, "created_at": "2024-05-01T09:30:00Z"}),
                json!({"id": "m1", "conversation_id": "c1", "sender_id": "b", "content": "hi",
                       "is_read": false, "created_at": "2024-05-01T09:00:00Z"}),
                json!({"id": "mx", "conversation_id": "c9", "sender_id": "b", "content": "elsewhere",
                       "is_read": false, "created_at": "2024-05-01T09:00:00Z"}),
            ],
        );
    }

    async fn open(store: &Arc<MemoryStore>) -> (ConversationView, mpsc::Receiver<Message>) {
        ConversationView::open(store.clone(), store.clone(), "c1", "me")
            .await
            .unwrap()
    }

    fn read_marks_for(store: &MemoryStore, id: &str) -> usize {
        store
            .calls()
            .iter()
            .filter(|c| {
                c.op == StoreOp::Update
                    && c.table == Table::Messages
                    && c.filters == vec![Filter::eq("id", id)]
            })
            .count()
    }

    #[tokio::test]
    async fn open_loads_ascending_history_and_marks_read() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let (view, _rx) = open(&store).await;

        let ids: Vec<_> = view.messages().await.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!(view.messages().await[0].is_read);
        assert_eq!(store.call_count(StoreOp::Update, Table::Messages), 1);

        let rows = store.rows(Table::Messages);
        let m2 = rows.iter().find(|r| r["id"] == "m2").unwrap();
        assert_eq!(m2["is_read"], false);
        let mx = rows.iter().find(|r| r["id"] == "mx").unwrap();
        assert_eq!(mx["is_read"], false);
    }

    #[tokio::test]
    async fn nothing_unread_means_no_update() {
        let store = Arc::new(MemoryStore::new());
        let (view, _rx) = open(&store).await;
        assert!(view.messages().await.is_empty());
        assert_eq!(store.call_count(StoreOp::Update, Table::Messages), 0);
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_network() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let (view, _rx) = open(&store).await;
        store.clear_calls();

        for (text, image) in [(None, None), (Some("   "), None), (Some(""), Some(" "))] {
            let err = view.send_message(text, image).await.unwrap_err();
            assert!(matches!(err, SocialError::EmptyMessage));
        }
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn send_appends_once_and_touches_conversation() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let (view, _rx) = open(&store).await;

        let sent = view.send_message(Some(" hello "), None).await.unwrap();
        assert_eq!(sent.content.as_deref(), Some("hello"));
        assert!(sent.image_url.is_none());

        // Give the realtime echo a chance to arrive; it must be deduplicated.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        let count = view
            .messages()
            .await
            .iter()
            .filter(|m| m.id == sent.id)
            .count();
        assert_eq!(count, 1);

        let conversation = &store.rows(Table::Conversations)[0];
        assert!(conversation["last_message_at"].is_string());
        // Own messages are never read-marked.
        assert_eq!(read_marks_for(&store, &sent.id), 0);
    }

    #[tokio::test]
    async fn image_only_message_is_allowed() {
        let store = Arc::new(MemoryStore::new());
        let conversation = get_or_create_conversation(store.as_ref(), "me", "b")
            .await
            .unwrap();
        let (view, _rx) = ConversationView::open(store.clone(), store.clone(), &conversation.id, "me")
            .await
            .unwrap();
        let sent = view
            .send_message(None, Some("https://cdn.example.com/cat.png"))
            .await
            .unwrap();
        assert!(sent.content.is_none());
        assert_eq!(sent.image_url.as_deref(), Some("https://cdn.example.com/cat.png"));
    }

    #[tokio::test]
    async fn inbound_message_triggers_exactly_one_read_mark() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let (view, mut rx) = open(&store).await;

        let row = store
            .insert(
                Table::Messages,
                json!({"conversation_id": "c1", "sender_id": "b", "content": "ping", "is_read": false}),
            )
            .await
            .unwrap();
        let id = row["id"].as_str().unwrap().to_string();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.id, id);
        assert!(received.is_read);
        assert_eq!(read_marks_for(&store, &id), 1);

        let last = view.messages().await.pop().unwrap();
        assert_eq!(last.id, id);
        assert!(last.is_read);
    }

    #[tokio::test]
    async fn messages_from_other_conversations_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let (view, mut rx) = open(&store).await;
        store
            .insert(
                Table::Messages,
                json!({"conversation_id": "c9", "sender_id": "b", "content": "nope"}),
            )
            .await
            .unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .is_err());
        assert_eq!(view.messages().await.len(), 2);
    }

    #[tokio::test]
    async fn close_releases_channel_and_rejects_sends() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let (mut view, _rx) = open(&store).await;
        assert_eq!(store.subscription_count(), 1);
        view.close().await;
        assert_eq!(store.subscription_count(), 0);
        assert!(matches!(
            view.send_message(Some("late"), None).await,
            Err(SocialError::Closed)
        ));
    }

    #[tokio::test]
    async fn reopened_view_receives_after_previous_drop() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let (first, _first_rx) = open(&store).await;
        drop(first);
        let (second, mut rx) = open(&store).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.subscription_count(), 1);

        let row = store
            .insert(
                Table::Messages,
                json!({"conversation_id": "c1", "sender_id": "b", "content": "still here"}),
            )
            .await
            .unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.id, row["id"].as_str().unwrap());
        assert_eq!(second.messages().await.len(), 3);
    }

    #[tokio::test]
    async fn closing_one_view_leaves_the_other_live() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let (mut a, _a_rx) = open(&store).await;
        let (_b, mut b_rx) = open(&store).await;
        assert_eq!(store.subscription_count(), 2);
        a.close().await;

        store
            .insert(
                Table::Messages,
                json!({"conversation_id": "c1", "sender_id": "b", "content": "for b"}),
            )
            .await
            .unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.content.as_deref(), Some("for b"));
    }

    #[tokio::test]
    async fn inbound_message_already_read_is_still_marked() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let (_view, mut rx) = open(&store).await;
        let row = store
            .insert(
                Table::Messages,
                json!({"conversation_id": "c1", "sender_id": "b", "content": "seen", "is_read": true}),
            )
            .await
            .unwrap();
        let id = row["id"].as_str().unwrap().to_string();
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read_marks_for(&store, &id), 1);
    }
}
