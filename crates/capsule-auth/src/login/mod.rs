//! OAuth completion
//!
//! One resolver normalizes every way the provider handoff can come back to
//! the app (an in-app browser session, a full-page redirect, or a
//! cross-application deep link) into a single [`OAuthOutcome`]. Each login
//! attempt walks `Idle -> AwaitingProvider -> Completed` exactly once.

mod callback;
mod transport;

pub use transport::{
    BrowserEvent, BrowserLauncher, CallbackDelivery, CrossAppDeepLink, FullPageRedirect,
    InAppBrowserSession, LoginTransport, PageNavigator,
};

use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Unique identifier for a login attempt, used for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(Uuid);

impl AttemptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal result of one login attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthOutcome {
    Success { token: String },
    /// The user dismissed the provider UI before any callback arrived.
    /// Not an error: nothing is shown and stored state is untouched.
    Cancelled,
    Error { message: String },
}

/// Where a login attempt currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    AwaitingProvider,
    Completed(OAuthOutcome),
}

/// Resolver settings.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Path the backend redirects to with the callback parameters. Callback
    /// URLs whose path differs are not trusted.
    pub callback_path: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            callback_path: "/callback".to_string(),
        }
    }
}

/// Normalizes all transport channels into one [`OAuthOutcome`].
pub struct CompletionResolver {
    config: ResolverConfig,
    state: RwLock<AttemptState>,
}

impl CompletionResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            state: RwLock::new(AttemptState::Idle),
        }
    }

    /// Current attempt state.
    pub fn state(&self) -> AttemptState {
        self.state.read().clone()
    }

    /// Begin a fresh attempt, discarding any previous outcome.
    pub fn reset(&self) {
        *self.state.write() = AttemptState::Idle;
    }

    /// Run a full login attempt over the given transport.
    ///
    /// Suspends until the provider UI completes, is dismissed, or fails.
    /// Transport failures become retryable [`OAuthOutcome::Error`]s rather
    /// than hard errors; dismissal becomes [`OAuthOutcome::Cancelled`].
    pub async fn resolve(
        &self,
        login_url: &str,
        transport: &dyn LoginTransport,
    ) -> OAuthOutcome {
        let attempt = AttemptId::new();
        info!("login attempt {} awaiting provider", attempt);
        *self.state.write() = AttemptState::AwaitingProvider;

        let outcome = match transport.authorize(login_url).await {
            Ok(CallbackDelivery::Url(url)) => {
                callback::outcome_from_url(&url, &self.config.callback_path)
            }
            Ok(CallbackDelivery::Dismissed) => OAuthOutcome::Cancelled,
            Err(e) => OAuthOutcome::Error {
                message: format!("Login could not be completed: {}", e),
            },
        };

        self.complete(attempt, outcome)
    }

    /// Complete the attempt directly from a raw callback URL.
    ///
    /// Used when the callback reaches the app out of band, e.g. a deep link
    /// delivered after the initiating view already closed. The path is
    /// validated before any parameter is trusted.
    pub fn complete_with_callback_url(&self, raw_url: &str) -> OAuthOutcome {
        let attempt = AttemptId::new();
        let outcome = callback::outcome_from_url(raw_url, &self.config.callback_path);
        self.complete(attempt, outcome)
    }

    fn complete(&self, attempt: AttemptId, outcome: OAuthOutcome) -> OAuthOutcome {
        match &outcome {
            OAuthOutcome::Success { .. } => info!("login attempt {} succeeded", attempt),
            OAuthOutcome::Cancelled => info!("login attempt {} cancelled by user", attempt),
            OAuthOutcome::Error { message } => {
                warn!("login attempt {} failed: {}", attempt, message)
            }
        }
        *self.state.write() = AttemptState::Completed(outcome.clone());
        outcome
    }
}
