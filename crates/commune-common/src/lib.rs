pub mod errors;
pub mod id;
pub mod toast;

pub use errors::{CommuneError, ConfigError};
pub use id::{new_id, new_session_token, SessionId};
pub use toast::{Toast, ToastLevel, ToastQueue};

pub type Result<T> = std::result::Result<T, CommuneError>;
