//! Row types for the backend tables the hooks read and write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    CoreTeam,
    Admin,
}

/// A row of `user_profiles`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default)]
    pub session_token: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Core team members and admins.
    pub fn is_core_team(&self) -> bool {
        matches!(self.role, Role::CoreTeam | Role::Admin)
    }
}

impl std::fmt::Debug for UserProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserProfile")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .field("is_anonymous", &self.is_anonymous)
            .field("role", &self.role)
            .field("is_blocked", &self.is_blocked)
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// The columns of a profile visible to other users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicProfile {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl PublicProfile {
    pub const COLUMNS: &'static str = "id,display_name,avatar_url";
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
    Message,
    Reshare,
    Blog,
    Announcement,
    #[serde(other)]
    Other,
}

/// A row of `notifications`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// A notification to be written for another user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationDraft {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub data: serde_json::Value,
    pub is_read: bool,
}

impl NotificationDraft {
    pub fn new(user_id: &str, kind: NotificationKind, title: impl Into<String>) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind,
            title: title.into(),
            body: None,
            data: serde_json::json!({}),
            is_read: false,
        }
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

/// A row of `conversations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participant_1: String,
    pub participant_2: String,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// The participant that is not `me`.
    pub fn counterpart(&self, me: &str) -> &str {
        if self.participant_1 == me {
            &self.participant_2
        } else {
            &self.participant_1
        }
    }
}

/// A row of `messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Presence & follows
// ---------------------------------------------------------------------------

/// A row of `active_visitors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveVisitor {
    pub session_id: String,
    pub page_path: String,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A row of `user_follows`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowEdge {
    pub follower_id: String,
    pub following_id: String,
}
