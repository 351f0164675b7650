//! Session lifecycle core for Capsule
//!
//! This crate owns everything between "the user clicked Sign in" and "an
//! authorized request can be sent": decoding the backend's signed session
//! token, completing the OAuth handoff over any of its delivery channels,
//! keeping the token fresh with a single-flight refresh, and gating
//! protected screens on current session validity.

pub mod backend;
pub mod guard;
pub mod login;
pub mod refresh;
pub mod session;
pub mod token;

pub use backend::{AuthBackend, BackendConfig, RefreshBackend};
pub use guard::{AuthState, GateDecision, GuardConfig, Navigator, SessionGuard};
pub use login::{
    AttemptId, AttemptState, BrowserEvent, BrowserLauncher, CallbackDelivery, CompletionResolver,
    CrossAppDeepLink, FullPageRedirect, InAppBrowserSession, LoginTransport, OAuthOutcome,
    PageNavigator, ResolverConfig,
};
pub use refresh::RefreshCoordinator;
pub use session::SessionManager;
pub use token::Session;
