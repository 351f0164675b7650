//! Single-flight session token refresh
//!
//! Any number of callers can demand a fresh token at once (expiring-token
//! checks before dispatch and 401 recovery both land here) and exactly one
//! network refresh runs. The in-flight operation is held as a shared future
//! behind a ticket slot; everyone who asks while it is active awaits the
//! same future and observes the same outcome.

use crate::backend::RefreshBackend;
use capsule_types::RefreshError;
use capsule_vault::TokenVault;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Future type every concurrent waiter shares.
pub type RefreshFuture = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

/// The one-at-a-time in-flight refresh.
struct RefreshTicket {
    started_at: DateTime<Utc>,
    future: RefreshFuture,
}

/// Coordinates refreshes so at most one network call is outstanding.
pub struct RefreshCoordinator {
    backend: Arc<dyn RefreshBackend>,
    vault: TokenVault,
    /// Zero or one active ticket. Created on first demand, emptied by the
    /// shared future itself right before it settles.
    ticket: Arc<Mutex<Option<RefreshTicket>>>,
}

impl RefreshCoordinator {
    pub fn new(backend: Arc<dyn RefreshBackend>, vault: TokenVault) -> Self {
        Self {
            backend,
            vault,
            ticket: Arc::new(Mutex::new(None)),
        }
    }

    /// Obtain a fresh session token, joining the in-flight refresh if one
    /// exists.
    ///
    /// On success the new token is already persisted in the vault when the
    /// returned future resolves; on failure the stored token has been
    /// cleared. Either way the ticket slot is empty again, so the next
    /// demand starts a new call.
    pub fn ensure_fresh(&self, current_token: &str) -> RefreshFuture {
        let mut slot = self.ticket.lock();

        if let Some(ticket) = slot.as_ref() {
            let elapsed = (Utc::now() - ticket.started_at).num_milliseconds();
            debug!("joining refresh in flight for {}ms", elapsed);
            return ticket.future.clone();
        }

        let backend = Arc::clone(&self.backend);
        let vault = self.vault.clone();
        let slot_handle = Arc::clone(&self.ticket);
        let current = current_token.to_string();

        let future: RefreshFuture = async move {
            let result = match backend.refresh(&current).await {
                Ok(new_token) => match vault.store_session_token(&new_token) {
                    Ok(()) => {
                        info!("session token refreshed");
                        Ok(new_token)
                    }
                    Err(e) => {
                        if let Err(clear_err) = vault.clear() {
                            warn!("failed to clear vault after store error: {}", clear_err);
                        }
                        Err(RefreshError::new(format!(
                            "Refreshed token could not be persisted: {}",
                            e
                        )))
                    }
                },
                Err(e) => {
                    warn!("token refresh failed: {}", e);
                    if let Err(clear_err) = vault.clear() {
                        warn!("failed to clear vault after refresh failure: {}", clear_err);
                    }
                    Err(RefreshError::new(e.to_string()))
                }
            };

            // The slot must be empty before any waiter resumes; a caller
            // arriving after settlement gets a fresh call, not a stale one.
            *slot_handle.lock() = None;
            result
        }
        .boxed()
        .shared();

        *slot = Some(RefreshTicket {
            started_at: Utc::now(),
            future: future.clone(),
        });

        future
    }

    /// Whether a refresh is currently outstanding.
    pub fn refresh_in_flight(&self) -> bool {
        self.ticket.lock().is_some()
    }
}
