//! Session lifecycle facade
//!
//! Ties the backend, vault, login resolver and guard together into the three
//! operations the app actually calls: sign in, sign out, restore.

use crate::backend::AuthBackend;
use crate::guard::{AuthState, SessionGuard};
use crate::login::{CompletionResolver, LoginTransport, OAuthOutcome};
use crate::token::{self, Session};
use capsule_types::{AppError, AppResult};
use capsule_vault::TokenVault;
use std::sync::Arc;
use tracing::{info, warn};

pub struct SessionManager {
    backend: Arc<AuthBackend>,
    vault: TokenVault,
    resolver: CompletionResolver,
    guard: Arc<SessionGuard>,
}

impl SessionManager {
    pub fn new(
        backend: Arc<AuthBackend>,
        vault: TokenVault,
        resolver: CompletionResolver,
        guard: Arc<SessionGuard>,
    ) -> Self {
        Self {
            backend,
            vault,
            resolver,
            guard,
        }
    }

    /// Run one login attempt over the given transport.
    ///
    /// `Ok(Some(session))` on success, `Ok(None)` when the user backed out.
    /// Cancellation leaves stored tokens and guard state exactly as they
    /// were.
    pub async fn sign_in(&self, transport: &dyn LoginTransport) -> AppResult<Option<Session>> {
        let login_url = self.backend.login_url(transport.uses_deep_link());

        match self.resolver.resolve(&login_url, transport).await {
            OAuthOutcome::Success { token } => {
                let session = token::decode(&token)
                    .ok_or_else(|| AppError::Token("Login returned an undecodable token".into()))?;
                self.vault.store_session_token(&token)?;
                self.guard.revalidate();
                info!("signed in as {}", session.subject);
                Ok(Some(session))
            }
            OAuthOutcome::Cancelled => {
                info!("login attempt cancelled by user");
                Ok(None)
            }
            OAuthOutcome::Error { message } => Err(AppError::OAuth(message)),
        }
    }

    /// Tear the session down locally and, best-effort, server-side.
    ///
    /// Local state is always cleared even when the backend call fails; a
    /// repeat call on an already-signed-out manager is a no-op.
    pub async fn sign_out(&self) -> AppResult<()> {
        if let Some(active) = self.vault.session_token()? {
            if let Err(e) = self.backend.logout(&active).await {
                warn!("server-side logout failed, clearing local session anyway: {}", e);
            }
        }

        self.vault.clear()?;
        self.resolver.reset();
        self.guard.force_unauthenticated();
        Ok(())
    }

    /// Recover session state at app start from whatever the vault holds.
    pub fn restore(&self) -> AuthState {
        self.guard.revalidate()
    }
}
