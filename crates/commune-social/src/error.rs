use crate::store::StoreError;

/// Errors surfaced by the social hooks to their callers.
#[derive(Debug, thiserror::Error)]
pub enum SocialError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("identity required")]
    NeedsIdentity,

    #[error("message has neither text nor image")]
    EmptyMessage,

    #[error("another operation is already in flight")]
    Busy,

    #[error("cannot target your own profile")]
    SelfTarget,

    #[error("already closed")]
    Closed,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("local session storage error: {0}")]
    Storage(String),
}

impl From<SocialError> for commune_common::CommuneError {
    fn from(err: SocialError) -> Self {
        match err {
            SocialError::Store(StoreError::Network(msg)) => Self::Network(msg),
            other => Self::Social(other.to_string()),
        }
    }
}
