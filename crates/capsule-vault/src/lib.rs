//! Secure session-token storage
//!
//! Provides a trait-based interface over the OS keyring so the auth core can
//! run against a real keyring in the app and an in-memory mock in tests.

mod storage;
mod vault;

pub use storage::{MockStorage, SystemKeyring, TokenStorage};
pub use vault::TokenVault;
