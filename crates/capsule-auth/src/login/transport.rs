//! Login transport adapters
//!
//! Three channels carry the provider handoff back into the app. Each is an
//! adapter over platform collaborators (browser launcher, page navigator,
//! deep-link feed) and all deliver the same thing: either a callback URL to
//! interpret or a dismissal.

use async_trait::async_trait;
use capsule_types::AppResult;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// What a transport hands back to the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackDelivery {
    /// A callback URL arrived; its parameters decide the outcome.
    Url(String),
    /// The provider UI ended without any callback.
    Dismissed,
}

/// A channel through which a login attempt reaches the provider and its
/// callback reaches us.
#[async_trait]
pub trait LoginTransport: Send + Sync {
    /// Whether callbacks arrive over an app deep link. Drives the
    /// `mobile=true` flag on the backend login URL.
    fn uses_deep_link(&self) -> bool;

    /// Send the user to the login URL and suspend until the attempt ends.
    async fn authorize(&self, login_url: &str) -> AppResult<CallbackDelivery>;
}

/// Opens URLs in whatever browser surface the platform provides.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> AppResult<()>;
}

/// Reassigns the primary navigation context (full-page redirect platforms).
pub trait PageNavigator: Send + Sync {
    fn assign(&self, url: &str);
}

/// Events emitted by an in-app browser view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEvent {
    /// The deep-link callback fired with this URL.
    Callback(String),
    /// The user closed the browser view without a callback.
    Dismissed,
}

/// Full in-app browser session: open the login URL in an embedded browser
/// and wait for its deep-link callback or dismissal.
pub struct InAppBrowserSession {
    launcher: Arc<dyn BrowserLauncher>,
    events: Mutex<mpsc::Receiver<BrowserEvent>>,
}

impl InAppBrowserSession {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, events: mpsc::Receiver<BrowserEvent>) -> Self {
        Self {
            launcher,
            events: Mutex::new(events),
        }
    }
}

#[async_trait]
impl LoginTransport for InAppBrowserSession {
    fn uses_deep_link(&self) -> bool {
        true
    }

    async fn authorize(&self, login_url: &str) -> AppResult<CallbackDelivery> {
        self.launcher.open(login_url)?;
        debug!("in-app browser session opened, awaiting callback");

        let mut events = self.events.lock().await;
        match events.recv().await {
            Some(BrowserEvent::Callback(url)) => Ok(CallbackDelivery::Url(url)),
            Some(BrowserEvent::Dismissed) | None => Ok(CallbackDelivery::Dismissed),
        }
    }
}

/// Full-page redirect, for platforms without an in-app browser.
///
/// The attempt spans two process lifetimes: the departing half assigns the
/// primary navigation context to the login URL (unloading the app), and the
/// returning half reads the callback parameters from the page's own
/// location after the backend redirects back.
pub struct FullPageRedirect {
    resumed_location: Option<String>,
    navigator: Option<Arc<dyn PageNavigator>>,
}

impl FullPageRedirect {
    /// Departing half: navigate away to the provider.
    pub fn departing(navigator: Arc<dyn PageNavigator>) -> Self {
        Self {
            resumed_location: None,
            navigator: Some(navigator),
        }
    }

    /// Returning half: the app restarted on the callback page at `location`.
    pub fn returning(location: impl Into<String>) -> Self {
        Self {
            resumed_location: Some(location.into()),
            navigator: None,
        }
    }
}

#[async_trait]
impl LoginTransport for FullPageRedirect {
    fn uses_deep_link(&self) -> bool {
        false
    }

    async fn authorize(&self, login_url: &str) -> AppResult<CallbackDelivery> {
        if let Some(location) = &self.resumed_location {
            return Ok(CallbackDelivery::Url(location.clone()));
        }

        if let Some(navigator) = &self.navigator {
            debug!("handing navigation context to the provider");
            navigator.assign(login_url);
        }
        // The navigation context unloads; this future is never resumed. The
        // attempt completes on next startup via the returning half.
        futures::future::pending().await
    }
}

/// Cross-application deep link: the login URL opens in an external browser
/// and the callback re-enters the app as a deep link, possibly long after
/// the initiating view closed.
pub struct CrossAppDeepLink {
    launcher: Arc<dyn BrowserLauncher>,
    links: Mutex<mpsc::Receiver<String>>,
}

impl CrossAppDeepLink {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, links: mpsc::Receiver<String>) -> Self {
        Self {
            launcher,
            links: Mutex::new(links),
        }
    }
}

#[async_trait]
impl LoginTransport for CrossAppDeepLink {
    fn uses_deep_link(&self) -> bool {
        true
    }

    async fn authorize(&self, login_url: &str) -> AppResult<CallbackDelivery> {
        self.launcher.open(login_url)?;
        debug!("external browser opened, awaiting deep link");

        let mut links = self.links.lock().await;
        match links.recv().await {
            Some(url) => Ok(CallbackDelivery::Url(url)),
            None => Ok(CallbackDelivery::Dismissed),
        }
    }
}
