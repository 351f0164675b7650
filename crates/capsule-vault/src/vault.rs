//! Typed facade over the raw storage trait
//!
//! The app persists exactly two secrets under fixed, well-known names: the
//! signed session token and an optional refresh artifact. `TokenVault` owns
//! those names and caches reads in memory so repeated lookups do not
//! re-prompt the OS keyring.

use crate::storage::TokenStorage;
use capsule_types::AppResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Keyring service name shared by both entries.
const SERVICE: &str = "Capsule-Session";

/// Well-known account names in the secure store.
const SESSION_TOKEN: &str = "session_token";
const REFRESH_ARTIFACT: &str = "refresh_artifact";

/// Shared handle to the persisted session credentials.
///
/// Cheap to clone; all clones share the same cache and underlying storage.
/// Write access is reserved for the refresh coordinator and the login path;
/// everything else only reads.
#[derive(Clone)]
pub struct TokenVault {
    storage: Arc<dyn TokenStorage>,
    cache: Arc<RwLock<HashMap<&'static str, String>>>,
}

impl TokenVault {
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            storage,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Vault over the system keyring.
    pub fn system() -> Self {
        Self::new(Arc::new(crate::storage::SystemKeyring))
    }

    /// Retrieve the stored session token, if any.
    pub fn session_token(&self) -> AppResult<Option<String>> {
        self.read(SESSION_TOKEN)
    }

    /// Persist a new session token, replacing any previous one.
    pub fn store_session_token(&self, token: &str) -> AppResult<()> {
        self.write(SESSION_TOKEN, token)
    }

    /// Retrieve the optional refresh artifact.
    pub fn refresh_artifact(&self) -> AppResult<Option<String>> {
        self.read(REFRESH_ARTIFACT)
    }

    /// Persist the refresh artifact.
    pub fn store_refresh_artifact(&self, artifact: &str) -> AppResult<()> {
        self.write(REFRESH_ARTIFACT, artifact)
    }

    /// Remove both entries. Idempotent: clearing an empty vault succeeds.
    pub fn clear(&self) -> AppResult<()> {
        self.storage.delete(SERVICE, SESSION_TOKEN)?;
        self.storage.delete(SERVICE, REFRESH_ARTIFACT)?;
        self.cache.write().clear();
        debug!("TokenVault: cleared stored session credentials");
        Ok(())
    }

    fn read(&self, account: &'static str) -> AppResult<Option<String>> {
        {
            let cache = self.cache.read();
            if let Some(value) = cache.get(account) {
                trace!("TokenVault: cache hit for {}", account);
                return Ok(Some(value.clone()));
            }
        }

        let value = self.storage.get(SERVICE, account)?;
        if let Some(ref v) = value {
            self.cache.write().insert(account, v.clone());
        }
        Ok(value)
    }

    fn write(&self, account: &'static str, value: &str) -> AppResult<()> {
        self.storage.store(SERVICE, account, value)?;
        self.cache.write().insert(account, value.to_string());
        trace!("TokenVault: stored {}", account);
        Ok(())
    }
}
