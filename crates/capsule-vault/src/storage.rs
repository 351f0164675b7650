//! Storage trait abstraction for testability
//!
//! Real (system keyring) and mock (in-memory) implementations share one
//! trait so every component that reads the stored token can be exercised
//! without touching the OS keyring.

use capsule_types::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Trait for secret storage operations
pub trait TokenStorage: Send + Sync {
    /// Store a key-value pair
    fn store(&self, service: &str, account: &str, secret: &str) -> AppResult<()>;

    /// Retrieve a value by service and account
    fn get(&self, service: &str, account: &str) -> AppResult<Option<String>>;

    /// Delete a key-value pair (no error when the entry does not exist)
    fn delete(&self, service: &str, account: &str) -> AppResult<()>;
}

/// Real implementation backed by the system keyring
pub struct SystemKeyring;

impl TokenStorage for SystemKeyring {
    fn store(&self, service: &str, account: &str, secret: &str) -> AppResult<()> {
        trace!("SystemKeyring: storing {}:{}", service, account);
        let entry = keyring::Entry::new(service, account)
            .map_err(|e| AppError::Storage(format!("Failed to access keyring: {}", e)))?;

        entry
            .set_password(secret)
            .map_err(|e| AppError::Storage(format!("Failed to store secret: {}", e)))?;

        debug!("SystemKeyring: stored {}:{}", service, account);
        Ok(())
    }

    fn get(&self, service: &str, account: &str) -> AppResult<Option<String>> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|e| AppError::Storage(format!("Failed to access keyring: {}", e)))?;

        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => {
                trace!("SystemKeyring: no entry for {}:{}", service, account);
                Ok(None)
            }
            Err(e) => Err(AppError::Storage(format!(
                "Failed to retrieve secret: {}",
                e
            ))),
        }
    }

    fn delete(&self, service: &str, account: &str) -> AppResult<()> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|e| AppError::Storage(format!("Failed to access keyring: {}", e)))?;

        match entry.delete_credential() {
            Ok(()) => {
                debug!("SystemKeyring: deleted {}:{}", service, account);
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AppError::Storage(format!("Failed to delete secret: {}", e))),
        }
    }
}

/// In-memory implementation for tests
///
/// Key format: "service:account"
#[derive(Clone, Default)]
pub struct MockStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_key(service: &str, account: &str) -> String {
        format!("{}:{}", service, account)
    }
}

impl TokenStorage for MockStorage {
    fn store(&self, service: &str, account: &str, secret: &str) -> AppResult<()> {
        let mut entries = self.entries.lock();
        entries.insert(Self::make_key(service, account), secret.to_string());
        Ok(())
    }

    fn get(&self, service: &str, account: &str) -> AppResult<Option<String>> {
        let entries = self.entries.lock();
        Ok(entries.get(&Self::make_key(service, account)).cloned())
    }

    fn delete(&self, service: &str, account: &str) -> AppResult<()> {
        let mut entries = self.entries.lock();
        entries.remove(&Self::make_key(service, account));
        Ok(())
    }
}
