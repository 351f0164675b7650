//! Backend auth endpoints
//!
//! The backend exposes a fixed contract: `/auth/login` redirects to the
//! identity provider, `/auth/refresh` exchanges the current session token
//! for a new one, `/auth/logout` invalidates the session server-side. This
//! module is the only place that contract is spelled out.

use async_trait::async_trait;
use capsule_types::{AppError, AppResult};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

/// Backend connection settings.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the companion backend, e.g. `https://api.capsule.app`.
    pub base_url: String,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }
}

/// Seam for the refresh network call, so the coordinator can be driven by a
/// test double.
#[async_trait]
pub trait RefreshBackend: Send + Sync {
    /// Exchange the current session token for a new one.
    async fn refresh(&self, current_token: &str) -> AppResult<String>;
}

/// Response body of `POST /auth/refresh`.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: String,
}

/// HTTP client for the backend's auth endpoints.
pub struct AuthBackend {
    config: BackendConfig,
    client: Client,
}

impl AuthBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Authorization entry point the user's browser is sent to.
    ///
    /// With `mobile` set, the backend's eventual callback redirect targets
    /// the app's deep link instead of an in-page response.
    pub fn login_url(&self, mobile: bool) -> String {
        if mobile {
            format!("{}/auth/login?mobile=true", self.config.base_url)
        } else {
            format!("{}/auth/login", self.config.base_url)
        }
    }

    /// Best-effort server-side session invalidation.
    ///
    /// Local teardown never waits on this succeeding; callers log and move
    /// on when it fails.
    pub async fn logout(&self, token: &str) -> AppResult<()> {
        let response = self
            .client
            .post(format!("{}/auth/logout", self.config.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Api(format!("Logout request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Api(format!(
                "Logout rejected with status {}",
                response.status()
            )));
        }

        debug!("server-side session invalidated");
        Ok(())
    }
}

#[async_trait]
impl RefreshBackend for AuthBackend {
    async fn refresh(&self, current_token: &str) -> AppResult<String> {
        let response = self
            .client
            .post(format!("{}/auth/refresh", self.config.base_url))
            .bearer_auth(current_token)
            .send()
            .await
            .map_err(|e| AppError::Api(format!("Refresh request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Api(format!(
                "Refresh rejected with status {}: {}",
                status, body
            )));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AppError::Api(format!("Failed to parse refresh response: {}", e)))?;

        info!("backend issued a refreshed session token");
        Ok(body.token)
    }
}
