use std::sync::Arc;

use futures_util::future::try_join_all;
use serde_json::json;
use tracing::{debug, info};

use crate::error::SocialError;
use crate::model::{Conversation, Message, PublicProfile};
use crate::store::{decode_row, decode_rows, Filter, Query, RemoteStore, StoreError, Table};

/// Find the conversation between `me` and `other`, creating it if none
/// exists. Either participant ordering matches.
pub async fn get_or_create_conversation(
    store: &dyn RemoteStore,
    me: &str,
    other: &str,
) -> Result<Conversation, SocialError> {
    if me == other {
        return Err(SocialError::SelfTarget);
    }

    let query = Query::table(Table::Conversations)
        .or(vec![
            Filter::and(vec![
                Filter::eq("participant_1", me),
                Filter::eq("participant_2", other),
            ]),
            Filter::and(vec![
                Filter::eq("participant_1", other),
                Filter::eq("participant_2", me),
            ]),
        ])
        .limit(1);
    if let Some(row) = store.select(&query).await?.into_iter().next() {
        return Ok(decode_row(row)?);
    }

    let row = store
        .insert(
            Table::Conversations,
            json!({ "participant_1": me, "participant_2": other }),
        )
        .await?;
    let conversation: Conversation = decode_row(row)?;
    info!(conversation_id = %conversation.id, "Conversation created");
    Ok(conversation)
}

/// One inbox entry.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    /// `None` when the counterpart's profile no longer exists.
    pub counterpart: Option<PublicProfile>,
    pub last_message: Option<Message>,
    /// Messages from the counterpart not yet read.
    pub unread: u64,
}

/// Every conversation `me` takes part in, most recently active first.
pub struct ConversationList {
    store: Arc<dyn RemoteStore>,
    me: String,
    summaries: Vec<ConversationSummary>,
}

impl ConversationList {
    pub async fn load(store: Arc<dyn RemoteStore>, me: &str) -> Result<Self, SocialError> {
        let summaries = fetch_summaries(store.as_ref(), me).await?;
        Ok(Self {
            store,
            me: me.to_string(),
            summaries,
        })
    }

    pub async fn refresh(&mut self) -> Result<(), SocialError> {
        self.summaries = fetch_summaries(self.store.as_ref(), &self.me).await?;
        Ok(())
    }

    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    pub fn total_unread(&self) -> u64 {
        self.summaries.iter().map(|s| s.unread).sum()
    }
}

async fn fetch_summaries(
    store: &dyn RemoteStore,
    me: &str,
) -> Result<Vec<ConversationSummary>, SocialError> {
    let rows = store
        .select(
            &Query::table(Table::Conversations)
                .or(vec![
                    Filter::eq("participant_1", me),
                    Filter::eq("participant_2", me),
                ])
                .order_desc("last_message_at"),
        )
        .await?;
    let conversations: Vec<Conversation> = decode_rows(rows)?;
    debug!(user_id = %me, count = conversations.len(), "Loading conversations");

    let summaries = try_join_all(
        conversations
            .into_iter()
            .map(|conversation| summarize(store, me, conversation)),
    )
    .await?;
    Ok(summaries)
}

async fn summarize(
    store: &dyn RemoteStore,
    me: &str,
    conversation: Conversation,
) -> Result<ConversationSummary, StoreError> {
    let counterpart_id = conversation.counterpart(me).to_string();
    let profile_query = Query::table(Table::UserProfiles)
        .select(PublicProfile::COLUMNS)
        .eq("id", counterpart_id)
        .limit(1);
    let last_query = Query::table(Table::Messages)
        .eq("conversation_id", conversation.id.as_str())
        .order_desc("created_at")
        .limit(1);
    let unread_query = Query::table(Table::Messages)
        .eq("conversation_id", conversation.id.as_str())
        .neq("sender_id", me)
        .eq("is_read", false);

    let (profiles, last, unread) = tokio::try_join!(
        store.select(&profile_query),
        store.select(&last_query),
        store.count(&unread_query),
    )?;

    let counterpart = profiles.into_iter().next().map(decode_row).transpose()?;
    let last_message = last.into_iter().next().map(decode_row).transpose()?;
    Ok(ConversationSummary {
        conversation,
        counterpart,
        last_message,
        unread,
    })
}
