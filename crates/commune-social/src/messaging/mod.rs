//! Direct messaging: the inbox, conversation lookup, and live conversation views.

mod conversations;
mod view;

pub use conversations::{get_or_create_conversation, ConversationList, ConversationSummary};
pub use view::ConversationView;
