//! Session guard
//!
//! Gates protected screens on current session validity. The guard owns the
//! auth state exclusively; screens only observe it and ask for a gate
//! decision. A screen is rendered only while a stored token decodes with a
//! strictly-future expiry; everything else routes to the login entry point,
//! remembering where the user was headed.

use crate::token;
use capsule_vault::TokenVault;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Current authentication state. Mutated only by the guard's own
/// transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    /// Presentation layer not ready yet; no redirect decisions are made.
    Unknown,
    /// A gate evaluation is in progress.
    Checking,
    Authenticated(token::Session),
    Unauthenticated { return_path: Option<String> },
}

/// What the host should render for a requested path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Render the protected content.
    Render,
    /// Keep showing a loading state; the host has not signalled readiness.
    Loading,
    /// Navigate to this login route instead.
    RedirectToLogin { route: String },
}

/// Presents routes on behalf of the guard.
pub trait Navigator: Send + Sync {
    /// Show the login entry point at the given route (return path already
    /// appended as a query parameter when one was captured).
    fn present_login(&self, route: &str);
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Route of the login entry point.
    pub login_path: String,
    /// Path of the OAuth callback page. Requests for auth-flow paths never
    /// capture a return path, or login would redirect back into itself.
    pub callback_path: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            callback_path: "/callback".to_string(),
        }
    }
}

pub struct SessionGuard {
    vault: TokenVault,
    navigator: Arc<dyn Navigator>,
    config: GuardConfig,
    state: RwLock<AuthState>,
    ready: AtomicBool,
}

impl SessionGuard {
    pub fn new(vault: TokenVault, navigator: Arc<dyn Navigator>, config: GuardConfig) -> Self {
        Self {
            vault,
            navigator,
            config,
            state: RwLock::new(AuthState::Unknown),
            ready: AtomicBool::new(false),
        }
    }

    /// The host presentation layer can now act on redirect decisions.
    pub fn notify_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        debug!("presentation layer ready, gate decisions active");
    }

    pub fn state(&self) -> AuthState {
        self.state.read().clone()
    }

    /// Decide whether `requested_path` may render.
    ///
    /// Until [`notify_ready`](Self::notify_ready) the state stays `Unknown`
    /// and the decision is `Loading`: redirecting before the view tree can
    /// process it would drop the navigation on the floor.
    pub fn evaluate(&self, requested_path: &str) -> GateDecision {
        if !self.ready.load(Ordering::SeqCst) {
            return GateDecision::Loading;
        }

        *self.state.write() = AuthState::Checking;

        match self.stored_session() {
            Some(session) => {
                debug!("session valid for {}, rendering {}", session.subject, requested_path);
                *self.state.write() = AuthState::Authenticated(session);
                GateDecision::Render
            }
            None => {
                let return_path = (!self.is_auth_path(requested_path))
                    .then(|| requested_path.to_string());
                let route = self.transition_unauthenticated(return_path);
                GateDecision::RedirectToLogin { route }
            }
        }
    }

    /// Recompute state from the vault without gating a specific path.
    ///
    /// Used at app start and after a login attempt lands a new token.
    pub fn revalidate(&self) -> AuthState {
        match self.stored_session() {
            Some(session) => {
                info!("session restored for {}", session.subject);
                *self.state.write() = AuthState::Authenticated(session);
            }
            None => {
                self.transition_unauthenticated(None);
            }
        }
        self.state()
    }

    /// Drop straight to `Unauthenticated` with no return path.
    ///
    /// Terminal refresh failures and logout land here; re-entering the
    /// previous screen would immediately fail again, so nothing is
    /// remembered. Idempotent: repeated calls do not re-present login.
    pub fn force_unauthenticated(&self) {
        {
            let state = self.state.read();
            if matches!(&*state, AuthState::Unauthenticated { return_path: None }) {
                return;
            }
        }
        self.transition_unauthenticated(None);
    }

    /// A stored, decodable, unexpired session, or nothing. Storage and
    /// decode failures are indistinguishable from "no token": they route to
    /// login silently, never to an error surface.
    fn stored_session(&self) -> Option<token::Session> {
        let stored = self.vault.session_token().ok().flatten()?;
        let session = token::decode(&stored)?;
        if session.is_expired(Utc::now()) {
            debug!("stored session token expired");
            return None;
        }
        Some(session)
    }

    fn is_auth_path(&self, path: &str) -> bool {
        path.starts_with(&self.config.login_path) || path.starts_with(&self.config.callback_path)
    }

    /// Returns the login route handed to the navigator.
    fn transition_unauthenticated(&self, return_path: Option<String>) -> String {
        let route = match &return_path {
            Some(path) => format!(
                "{}?return_to={}",
                self.config.login_path,
                urlencoding::encode(path)
            ),
            None => self.config.login_path.clone(),
        };

        *self.state.write() = AuthState::Unauthenticated { return_path };
        // Navigation happens outside the state lock; the navigator may call
        // back into the guard.
        self.navigator.present_login(&route);
        route
    }
}
