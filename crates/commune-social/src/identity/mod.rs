//! Long-lived anonymous or named identity, keyed by a locally stored
//! opaque token.

mod manager;
mod token_store;

pub use manager::IdentityManager;
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStore};
