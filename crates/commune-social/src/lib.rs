pub mod changes;
pub mod error;
pub mod follow;
pub mod identity;
pub mod messaging;
pub mod model;
pub mod notifications;
pub mod presence;
pub mod realtime;
pub mod store;

mod scope;

pub use changes::{ChangeFeed, ChangeFilter, ChangeKind, RowChange};
pub use error::SocialError;
pub use follow::{follower_count, following_count, FollowState};
pub use identity::{FileTokenStore, IdentityManager, MemoryTokenStore, TokenStore};
pub use messaging::{
    get_or_create_conversation, ConversationList, ConversationSummary, ConversationView,
};
pub use model::{
    ActiveVisitor, Conversation, FollowEdge, Message, Notification, NotificationDraft,
    NotificationKind, PublicProfile, Role, UserProfile,
};
pub use notifications::{send_notification, NotificationFeed, DEFAULT_PAGE_SIZE};
pub use presence::{
    GeoLocation, GeoLocator, HttpGeoLocator, NoGeoLocator, PresenceSettings, VisitorPresence,
};
pub use realtime::{RealtimeClient, RealtimeConfig, RealtimeFeed};
pub use store::{Filter, Query, RemoteStore, RestStore, Row, StoreError, Table};
