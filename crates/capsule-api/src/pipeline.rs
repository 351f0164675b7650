//! Request pipeline
//!
//! One path to the backend for every protected endpoint. The pipeline reads
//! the session token from the vault, refreshes it through the single-flight
//! coordinator when it is about to expire, and retries a rejected request
//! exactly once with a freshly refreshed token. Requests that arrive while a
//! refresh is outstanding are parked in a FIFO queue and replayed one at a
//! time once the refresh settles.

use capsule_auth::token;
use capsule_auth::{RefreshCoordinator, SessionGuard};
use capsule_types::{AppError, AppResult, RefreshError};
use capsule_vault::TokenVault;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use reqwest::{Client, Method, StatusCode};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base URL of the companion backend.
    pub base_url: String,
    /// Tokens expiring within this window are refreshed before the request
    /// is sent.
    pub refresh_buffer: Duration,
}

impl PipelineConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            refresh_buffer: Duration::minutes(5),
        }
    }
}

/// A request to a protected backend endpoint.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Endpoint path, leading slash included.
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::DELETE,
            path: path.into(),
            body: None,
        }
    }
}

/// Response from a protected endpoint. Statuses other than 401 pass through
/// untouched; the caller decides what a 404 or a 500 means for its screen.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_str(&self.body).map_err(AppError::from)
    }
}

/// Immutable retry counter around a request. A replay constructs a new
/// value instead of flipping a flag on the request itself.
#[derive(Debug, Clone)]
struct Attempt {
    request: ApiRequest,
    retries: u8,
}

impl Attempt {
    fn first(request: ApiRequest) -> Self {
        Self { request, retries: 0 }
    }

    fn retried(self) -> Self {
        Self {
            request: self.request,
            retries: self.retries + 1,
        }
    }
}

/// An attempt parked behind an in-flight refresh.
struct PendingRequest {
    attempt: Attempt,
    /// Token in hand when the attempt was parked. A failed proactive refresh
    /// clears the vault, and this is what lets the replay still carry the
    /// stale token to the backend, same as the request that triggered the
    /// refresh.
    stale_token: Option<String>,
    responder: oneshot::Sender<AppResult<ApiResponse>>,
}

/// What became of one parked attempt during a drain pass.
enum Replay {
    Settled(AppResult<ApiResponse>),
    /// First attempt came back 401; it owes the backend one retry behind a
    /// reactive refresh of the token it was sent with.
    RetryAfterRefresh(String),
}

pub struct RequestPipeline {
    config: PipelineConfig,
    client: Client,
    vault: TokenVault,
    refresher: Arc<RefreshCoordinator>,
    guard: Arc<SessionGuard>,
    queue: Mutex<VecDeque<PendingRequest>>,
    /// Serializes queue replay so parked requests go out one at a time, in
    /// arrival order.
    drain: tokio::sync::Mutex<()>,
}

impl RequestPipeline {
    pub fn new(
        config: PipelineConfig,
        vault: TokenVault,
        refresher: Arc<RefreshCoordinator>,
        guard: Arc<SessionGuard>,
    ) -> Self {
        Self {
            config,
            client: Client::new(),
            vault,
            refresher,
            guard,
            queue: Mutex::new(VecDeque::new()),
            drain: tokio::sync::Mutex::new(()),
        }
    }

    /// Send an authenticated request.
    ///
    /// With no stored session this fails immediately with
    /// [`AppError::Unauthorized`]; it never sends an unauthenticated request
    /// to a protected endpoint.
    pub async fn execute(&self, request: ApiRequest) -> AppResult<ApiResponse> {
        if self.refresher.refresh_in_flight() {
            return self.park(Attempt::first(request)).await;
        }

        let token = self
            .vault
            .session_token()?
            .ok_or(AppError::Unauthorized)?;

        let (token, refreshed) = self.fresh_enough(token).await;
        let result = self.send(token, Attempt::first(request)).await;
        if refreshed {
            // Anything that queued up behind the proactive refresh replays
            // now, after the request that triggered it.
            self.drain_parked().await;
        }
        result
    }

    /// Park an attempt behind the in-flight refresh and wait for its replay.
    async fn park(&self, attempt: Attempt) -> AppResult<ApiResponse> {
        let stale_token = self.vault.session_token().ok().flatten();
        let (responder, receiver) = oneshot::channel();
        self.queue.lock().push_back(PendingRequest {
            attempt,
            stale_token,
            responder,
        });
        debug!("request parked behind in-flight refresh");

        // The refresh may have settled between the in-flight check and the
        // push, in which case no drainer is coming and we replay ourselves.
        if !self.refresher.refresh_in_flight() {
            self.drain_parked().await;
        }

        receiver
            .await
            .map_err(|_| AppError::Api("Parked request was dropped before replay".to_string()))?
    }

    /// Refresh the token if it expires within the configured buffer.
    ///
    /// A failed proactive refresh is logged and swallowed: the request still
    /// goes out with the token in hand, and the backend gets to be the judge
    /// of whether it is actually still good.
    async fn fresh_enough(&self, token: String) -> (String, bool) {
        let about_to_expire = token::decode(&token)
            .map(|s| s.remaining(Utc::now()) <= self.config.refresh_buffer)
            .unwrap_or(true);
        if !about_to_expire {
            return (token, false);
        }

        debug!("session token inside refresh buffer, refreshing before send");
        match self.refresher.ensure_fresh(&token).await {
            Ok(new_token) => (new_token, true),
            Err(e) => {
                warn!("proactive refresh failed, sending with current token: {}", e);
                (token, true)
            }
        }
    }

    /// First send plus reactive 401 handling.
    ///
    /// A rejected first attempt parks itself again with its retry count
    /// bumped and joins the shared refresh; once the refresh settles, the
    /// whole queue replays in arrival order (this attempt included). The
    /// result comes back through the same oneshot as every other parked
    /// request.
    async fn send(&self, token: String, attempt: Attempt) -> AppResult<ApiResponse> {
        let response = self.dispatch(&token, &attempt.request).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("request to {} rejected, refreshing session for replay", attempt.request.path);
        let (responder, receiver) = oneshot::channel();
        self.queue.lock().push_back(PendingRequest {
            attempt: attempt.retried(),
            stale_token: None,
            responder,
        });

        match self.refresher.ensure_fresh(&token).await {
            Ok(_) => self.drain_parked().await,
            Err(e) => {
                // The coordinator already cleared the vault; the session is
                // gone for good and every parked request fails with it.
                self.guard.force_unauthenticated();
                self.fail_parked(e).await;
            }
        }

        receiver
            .await
            .map_err(|_| AppError::Api("Parked request was dropped before replay".to_string()))?
    }

    /// Replay every parked attempt in arrival order, one at a time. A first
    /// attempt rejected during the drain re-enters the queue with its retry
    /// count bumped and comes back around after a reactive refresh.
    async fn drain_parked(&self) {
        let _guard = self.drain.lock().await;
        loop {
            let pending = self.queue.lock().pop_front();
            let Some(pending) = pending else { break };
            match self.replay(&pending).await {
                Replay::Settled(result) => {
                    // The parked caller may have given up waiting; that is
                    // its call.
                    let _ = pending.responder.send(result);
                }
                Replay::RetryAfterRefresh(rejected_token) => {
                    self.queue.lock().push_back(PendingRequest {
                        attempt: pending.attempt.retried(),
                        stale_token: None,
                        responder: pending.responder,
                    });
                    if let Err(e) = self.refresher.ensure_fresh(&rejected_token).await {
                        self.guard.force_unauthenticated();
                        self.fail_queue(e);
                    }
                }
            }
        }
    }

    /// Settle every parked attempt with the refresh failure.
    async fn fail_parked(&self, error: RefreshError) {
        let _guard = self.drain.lock().await;
        self.fail_queue(error);
    }

    fn fail_queue(&self, error: RefreshError) {
        loop {
            let pending = self.queue.lock().pop_front();
            let Some(pending) = pending else { break };
            let _ = pending.responder.send(Err(AppError::Refresh(error.clone())));
        }
    }

    /// Send a parked attempt with whatever token the vault holds now,
    /// falling back to the token it was parked with when a failed refresh
    /// has emptied the vault. A first attempt rejected here still gets its
    /// one reactive retry; a rejection of an already-retried attempt
    /// surfaces as `Unauthorized` without another refresh and without
    /// tearing the session down on its own.
    async fn replay(&self, pending: &PendingRequest) -> Replay {
        let attempt = &pending.attempt;
        let stored = self.vault.session_token().ok().flatten();
        let Some(token) = stored.or_else(|| pending.stale_token.clone()) else {
            return Replay::Settled(Err(AppError::Unauthorized));
        };

        debug!("replaying {} (retry {})", attempt.request.path, attempt.retries);
        let response = match self.dispatch(&token, &attempt.request).await {
            Ok(response) => response,
            Err(e) => return Replay::Settled(Err(e)),
        };
        if response.status == StatusCode::UNAUTHORIZED {
            if attempt.retries == 0 {
                debug!(
                    "parked request to {} rejected on first send, refreshing for its retry",
                    attempt.request.path
                );
                return Replay::RetryAfterRefresh(token);
            }
            warn!("request to {} rejected again after refresh", attempt.request.path);
            return Replay::Settled(Err(AppError::Unauthorized));
        }
        Replay::Settled(Ok(response))
    }

    async fn dispatch(&self, token: &str, request: &ApiRequest) -> AppResult<ApiResponse> {
        let url = format!("{}{}", self.config.base_url, request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .bearer_auth(token);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Api(format!("Request to {} failed: {}", request.path, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Api(format!("Failed to read response from {}: {}", request.path, e)))?;

        Ok(ApiResponse { status, body })
    }
}
