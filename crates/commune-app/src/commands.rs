//! One handler per subcommand.

use std::io::Write;
use std::time::Duration;

use commune_common::CommuneError;
use commune_config::CommuneConfig;
use commune_social::{
    follower_count, get_or_create_conversation, ConversationList, ConversationView, FollowState,
    GeoLocator, HttpGeoLocator, NoGeoLocator, NotificationFeed, PresenceSettings, SocialError,
    UserProfile, VisitorPresence,
};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::context::AppContext;

type CmdResult = Result<(), CommuneError>;

async fn require_identity(ctx: &AppContext) -> Result<UserProfile, CommuneError> {
    ctx.identity
        .current()
        .await
        .ok_or_else(|| SocialError::NeedsIdentity.into())
}

pub async fn whoami(ctx: &AppContext, out: &mut dyn Write) -> CmdResult {
    match ctx.identity.current().await {
        Some(p) => {
            let kind = if p.is_anonymous { "anonymous" } else { "named" };
            writeln!(out, "{} <{}> ({kind}, id {})", p.display_name, p.email, p.id)?;
            if p.is_core_team() {
                writeln!(out, "core team")?;
            }
        }
        None => writeln!(out, "not identified; run `commune identify`")?,
    }
    Ok(())
}

pub async fn identify(
    ctx: &AppContext,
    out: &mut dyn Write,
    email: &str,
    name: &str,
    anonymous: bool,
) -> CmdResult {
    let profile = ctx.identity.identify(email, name, anonymous).await?;
    writeln!(out, "identified as {} (id {})", profile.display_name, profile.id)?;
    Ok(())
}

pub async fn sign_out(ctx: &AppContext, out: &mut dyn Write) -> CmdResult {
    ctx.identity.sign_out().await?;
    writeln!(out, "signed out")?;
    Ok(())
}

pub async fn notifications(
    ctx: &mut AppContext,
    out: &mut dyn Write,
    watch: bool,
    mark_all: bool,
) -> CmdResult {
    let me = require_identity(ctx).await?;
    let feed = ctx.feed();
    let page_size = ctx.config.notifications.page_size as usize;
    let (mut notifications, mut incoming) =
        NotificationFeed::start(ctx.store.clone(), feed, &me.id, page_size).await?;

    for n in notifications.notifications().await.iter().rev() {
        let marker = if n.is_read { ' ' } else { '*' };
        writeln!(out, "{marker} [{:?}] {} {}", n.kind, n.created_at.format("%Y-%m-%d %H:%M"), n.title)?;
    }
    writeln!(out, "{} unread", notifications.unread_count().await)?;

    if mark_all {
        if let Err(e) = notifications.mark_all_as_read().await {
            ctx.report("Could not mark notifications read", &e.into());
        } else {
            writeln!(out, "all marked read")?;
        }
    }

    if watch {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                n = incoming.recv() => match n {
                    Some(n) => {
                        writeln!(out, "* [{:?}] {}", n.kind, n.title)?;
                        out.flush()?;
                    }
                    None => break,
                },
            }
        }
    }

    notifications.close().await;
    Ok(())
}

pub async fn inbox(ctx: &AppContext, out: &mut dyn Write) -> CmdResult {
    let me = require_identity(ctx).await?;
    let list = ConversationList::load(ctx.store.clone(), &me.id).await?;
    for s in list.summaries() {
        let who = s
            .counterpart
            .as_ref()
            .map(|p| p.display_name.as_str())
            .unwrap_or("(deleted user)");
        let preview = s
            .last_message
            .as_ref()
            .map(|m| m.content.as_deref().unwrap_or("[image]"))
            .unwrap_or("");
        writeln!(out, "{who:<24} {:>3} unread  {preview}", s.unread)?;
    }
    writeln!(out, "{} unread in total", list.total_unread())?;
    Ok(())
}

pub async fn chat(
    ctx: &mut AppContext,
    out: &mut dyn Write,
    user: &str,
    message: Option<&str>,
    image: Option<&str>,
) -> CmdResult {
    let me = require_identity(ctx).await?;
    let conversation = get_or_create_conversation(ctx.store.as_ref(), &me.id, user).await?;
    let feed = ctx.feed();
    let (mut view, mut incoming) =
        ConversationView::open(ctx.store.clone(), feed, &conversation.id, &me.id).await?;

    for m in view.messages().await {
        let who = if m.sender_id == me.id { "me" } else { "them" };
        writeln!(out, "{who}: {}", m.content.as_deref().unwrap_or("[image]"))?;
    }

    if message.is_some() || image.is_some() {
        let result = view.send_message(message, image).await;
        view.close().await;
        result?;
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = view.send_message(Some(&line), None).await {
                        ctx.report("Message not sent", &e.into());
                    }
                }
                None => break,
            },
            m = incoming.recv() => match m {
                Some(m) if m.sender_id != me.id => {
                    writeln!(out, "them: {}", m.content.as_deref().unwrap_or("[image]"))?;
                    out.flush()?;
                }
                Some(_) => {}
                None => break,
            },
        }
    }
    view.close().await;
    Ok(())
}

pub async fn follow(ctx: &AppContext, out: &mut dyn Write, user: &str, status_only: bool) -> CmdResult {
    let me = ctx.identity.current().await;
    let state = FollowState::load(ctx.store.clone(), me, user).await?;
    if !status_only {
        state.toggle().await?;
    }
    let verb = if state.is_following().await {
        "following"
    } else {
        "not following"
    };
    let followers = follower_count(ctx.store.as_ref(), user).await?;
    writeln!(out, "{verb} {user} ({followers} followers)")?;
    Ok(())
}

pub async fn presence(ctx: &mut AppContext, out: &mut dyn Write, path: &str) -> CmdResult {
    if !ctx.config.presence.enabled {
        writeln!(out, "presence is disabled in the config")?;
        return Ok(());
    }
    let settings = PresenceSettings {
        heartbeat_interval: Duration::from_secs(u64::from(ctx.config.presence.heartbeat_interval)),
        sweep_interval: Duration::from_secs(u64::from(ctx.config.presence.sweep_interval)),
        stale_after: Duration::from_secs(u64::from(ctx.config.presence.stale_after)),
    };
    let geo: Box<dyn GeoLocator> = if ctx.config.geolocation.enabled {
        Box::new(HttpGeoLocator::new(&ctx.config.geolocation.url))
    } else {
        Box::new(NoGeoLocator)
    };
    let user_id = ctx.identity.current().await.map(|p| p.id);
    let feed = ctx.feed();
    let (mut session, mut counts) = VisitorPresence::start(
        ctx.store.clone(),
        feed,
        geo.as_ref(),
        path,
        user_id.as_deref(),
        settings,
    )
    .await?;

    writeln!(out, "{} active visitors", *counts.borrow_and_update())?;
    out.flush()?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = counts.changed() => {
                if changed.is_err() {
                    break;
                }
                writeln!(out, "{} active visitors", *counts.borrow_and_update())?;
                out.flush()?;
            }
        }
    }
    session.close().await;
    Ok(())
}

pub fn config(config: &CommuneConfig, out: &mut dyn Write) -> CmdResult {
    let mut shown = config.clone();
    if !shown.backend.api_key.is_empty() {
        shown.backend.api_key = "[REDACTED]".into();
    }
    writeln!(out, "{}", commune_config::config_to_json(&shown))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use commune_social::changes::ChangeFeed;
    use commune_social::store::memory::MemoryStore;
    use commune_social::{MemoryTokenStore, RemoteStore, Table};
    use serde_json::json;

    async fn context(store: &Arc<MemoryStore>) -> AppContext {
        let feed: Arc<dyn ChangeFeed> = store.clone();
        let remote: Arc<dyn RemoteStore> = store.clone();
        AppContext::with_backend(
            CommuneConfig::default(),
            remote,
            Some(feed),
            Arc::new(MemoryTokenStore::new()),
        )
        .await
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn whoami_before_and_after_identify() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(&store).await;

        let mut buf = Vec::new();
        whoami(&ctx, &mut buf).await.unwrap();
        assert!(output(buf).contains("not identified"));

        let mut buf = Vec::new();
        identify(&ctx, &mut buf, "ana@example.com", "Ana", false).await.unwrap();
        let mut buf = Vec::new();
        whoami(&ctx, &mut buf).await.unwrap();
        assert!(output(buf).starts_with("Ana <ana@example.com>"));
    }

    #[tokio::test]
    async fn commands_needing_identity_fail_cleanly() {
        let store = Arc::new(MemoryStore::new());
        let mut ctx = context(&store).await;
        let mut buf = Vec::new();
        let err = inbox(&ctx, &mut buf).await.unwrap_err();
        assert!(matches!(err, CommuneError::Social(_)));
        let err = follow(&ctx, &mut buf, "u2", false).await.unwrap_err();
        assert!(matches!(err, CommuneError::Social(_)));
        assert!(notifications(&mut ctx, &mut buf, false, false).await.is_err());
    }

    #[tokio::test]
    async fn one_shot_chat_sends_and_inbox_lists_it() {
        let store = Arc::new(MemoryStore::new());
        let mut ctx = context(&store).await;
        let me = ctx.identity.identify("ana@example.com", "Ana", false).await.unwrap();
        store.seed(
            Table::UserProfiles,
            vec![json!({"id": "u2", "email": "bea@example.com", "display_name": "Bea"})],
        );

        let mut buf = Vec::new();
        chat(&mut ctx, &mut buf, "u2", Some("hello"), None).await.unwrap();
        let messages = store.rows(Table::Messages);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["sender_id"], me.id.as_str());

        let mut buf = Vec::new();
        inbox(&ctx, &mut buf).await.unwrap();
        let text = output(buf);
        assert!(text.contains("Bea"));
        assert!(text.contains("hello"));
        assert!(text.contains("0 unread in total"));
    }

    #[tokio::test]
    async fn follow_toggles_and_reports() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(&store).await;
        ctx.identity.identify("ana@example.com", "Ana", false).await.unwrap();

        let mut buf = Vec::new();
        follow(&ctx, &mut buf, "u2", false).await.unwrap();
        assert_eq!(output(buf).trim(), "following u2 (1 followers)");

        let mut buf = Vec::new();
        follow(&ctx, &mut buf, "u2", true).await.unwrap();
        assert_eq!(output(buf).trim(), "following u2 (1 followers)");
        assert_eq!(store.rows(Table::Notifications).len(), 1);
    }

    #[tokio::test]
    async fn notifications_mark_all() {
        let store = Arc::new(MemoryStore::new());
        let mut ctx = context(&store).await;
        let me = ctx.identity.identify("ana@example.com", "Ana", false).await.unwrap();
        store.seed(
            Table::Notifications,
            vec![json!({"user_id": me.id, "type": "like", "title": "Liked", "is_read": false})],
        );

        let mut buf = Vec::new();
        notifications(&mut ctx, &mut buf, false, true).await.unwrap();
        let text = output(buf);
        assert!(text.contains("1 unread"));
        assert!(text.contains("all marked read"));
        assert_eq!(store.rows(Table::Notifications)[0]["is_read"], true);
        assert!(ctx.toasts.is_empty());
    }

    #[tokio::test]
    async fn config_output_hides_api_key() {
        let mut settings = CommuneConfig::default();
        settings.backend.api_key = "super-secret".into();
        let mut buf = Vec::new();
        config(&settings, &mut buf).unwrap();
        let text = output(buf);
        assert!(!text.contains("super-secret"));
        assert!(text.contains("[REDACTED]"));
    }
}
