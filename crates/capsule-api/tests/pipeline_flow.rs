//! Pipeline behavior against a mock backend: proactive and reactive refresh,
//! the single retry, and replay ordering for requests parked behind a
//! refresh.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use capsule_api::{ApiRequest, PipelineConfig, RequestPipeline};
use capsule_auth::{
    AuthBackend, AuthState, BackendConfig, GuardConfig, Navigator, RefreshCoordinator, SessionGuard,
};
use capsule_types::AppError;
use capsule_vault::{MockStorage, TokenVault};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct NullNavigator;

impl Navigator for NullNavigator {
    fn present_login(&self, _route: &str) {}
}

fn make_token(subject: &str, exp: i64) -> String {
    let claims = serde_json::json!({ "sub": subject, "exp": exp });
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(b"{}"),
        URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes())
    )
}

fn far_token() -> String {
    make_token("pilot-9", Utc::now().timestamp() + 7200)
}

fn near_expiry_token() -> String {
    make_token("pilot-9", Utc::now().timestamp() + 60)
}

fn build(base_url: &str) -> (Arc<RequestPipeline>, TokenVault, Arc<SessionGuard>) {
    let vault = TokenVault::new(Arc::new(MockStorage::new()));
    let backend = Arc::new(AuthBackend::new(BackendConfig::new(base_url)));
    let refresher = Arc::new(RefreshCoordinator::new(backend, vault.clone()));
    let guard = Arc::new(SessionGuard::new(
        vault.clone(),
        Arc::new(NullNavigator),
        GuardConfig::default(),
    ));
    let pipeline = Arc::new(RequestPipeline::new(
        PipelineConfig::new(base_url),
        vault.clone(),
        refresher,
        guard.clone(),
    ));
    (pipeline, vault, guard)
}

async fn mount_refresh(server: &MockServer, new_token: &str, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token": new_token
        })))
        .expect(calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fresh_token_passes_straight_through() {
    init_tracing();
    let server = MockServer::start().await;
    let token = far_token();

    Mock::given(method("GET"))
        .and(path("/wallet"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"balance":1200}"#))
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, vault, _guard) = build(&server.uri());
    vault.store_session_token(&token).unwrap();

    let response = pipeline.execute(ApiRequest::get("/wallet")).await.unwrap();
    assert_eq!(response.status.as_u16(), 200);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["balance"], 1200);
}

#[tokio::test]
async fn test_no_session_fails_without_touching_network() {
    init_tracing();
    let server = MockServer::start().await;
    let (pipeline, _vault, _guard) = build(&server.uri());

    let err = pipeline.execute(ApiRequest::get("/wallet")).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_near_expiry_token_is_refreshed_before_send() {
    init_tracing();
    let server = MockServer::start().await;
    let stale = near_expiry_token();
    let fresh = far_token();

    mount_refresh(&server, &fresh, 1).await;
    Mock::given(method("GET"))
        .and(path("/wallet"))
        .and(header("authorization", format!("Bearer {fresh}").as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, vault, _guard) = build(&server.uri());
    vault.store_session_token(&stale).unwrap();

    pipeline.execute(ApiRequest::get("/wallet")).await.unwrap();
    assert_eq!(vault.session_token().unwrap(), Some(fresh));
}

#[tokio::test]
async fn test_failed_proactive_refresh_sends_current_token_anyway() {
    init_tracing();
    let server = MockServer::start().await;
    let stale = near_expiry_token();

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wallet"))
        .and(header("authorization", format!("Bearer {stale}").as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, vault, _guard) = build(&server.uri());
    vault.store_session_token(&stale).unwrap();

    let response = pipeline.execute(ApiRequest::get("/wallet")).await.unwrap();
    assert_eq!(response.status.as_u16(), 200);
    // The failed refresh has torn down stored credentials.
    assert_eq!(vault.session_token().unwrap(), None);
}

#[tokio::test]
async fn test_parked_request_survives_failed_proactive_refresh() {
    init_tracing();
    let server = MockServer::start().await;
    let stale = near_expiry_token();

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;
    for endpoint in ["/wallet", "/orders"] {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .and(header("authorization", format!("Bearer {stale}").as_str()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
    }

    let (pipeline, vault, _guard) = build(&server.uri());
    vault.store_session_token(&stale).unwrap();

    // The first request starts the proactive refresh; the second arrives
    // while it is in flight and parks behind it.
    let trigger = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.execute(ApiRequest::get("/wallet")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let parked = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.execute(ApiRequest::get("/orders")).await })
    };

    assert_eq!(trigger.await.unwrap().unwrap().status.as_u16(), 200);
    assert_eq!(parked.await.unwrap().unwrap().status.as_u16(), 200);
    // The failed refresh cleared stored credentials, yet both requests still
    // went out with the token that was in hand when the refresh started.
    assert_eq!(vault.session_token().unwrap(), None);
}

#[tokio::test]
async fn test_parked_request_rejected_on_replay_still_retries_once() {
    init_tracing();
    let server = MockServer::start().await;
    let stale = near_expiry_token();
    // Distinct expiries so the bearer header matchers cannot collide.
    let fresh = make_token("pilot-9", Utc::now().timestamp() + 7200);
    let fresher = make_token("pilot-9", Utc::now().timestamp() + 9000);

    // First refresh is the proactive one the trigger request starts; the
    // second is the reactive refresh owed to the parked request after its
    // first send comes back 401.
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "token": fresh }))
                .set_delay(Duration::from_millis(150)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": fresher })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wallet"))
        .and(header("authorization", format!("Bearer {fresh}").as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .and(header("authorization", format!("Bearer {fresh}").as_str()))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orders"))
        .and(header("authorization", format!("Bearer {fresher}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, vault, _guard) = build(&server.uri());
    vault.store_session_token(&stale).unwrap();

    let trigger = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.execute(ApiRequest::get("/wallet")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let parked = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.execute(ApiRequest::get("/orders")).await })
    };

    assert_eq!(trigger.await.unwrap().unwrap().status.as_u16(), 200);
    let response = parked.await.unwrap().unwrap();
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.body, "[]");
    assert_eq!(vault.session_token().unwrap(), Some(fresher));
}

#[tokio::test]
async fn test_rejected_request_retries_once_with_refreshed_token() {
    init_tracing();
    let server = MockServer::start().await;
    let token = far_token();
    // Distinct expiry so the two bearer header matchers cannot collide.
    let fresh = make_token("pilot-9", Utc::now().timestamp() + 9000);

    Mock::given(method("GET"))
        .and(path("/portfolio"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, &fresh, 1).await;
    Mock::given(method("GET"))
        .and(path("/portfolio"))
        .and(header("authorization", format!("Bearer {fresh}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, vault, _guard) = build(&server.uri());
    vault.store_session_token(&token).unwrap();

    let response = pipeline.execute(ApiRequest::get("/portfolio")).await.unwrap();
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(vault.session_token().unwrap(), Some(fresh));
}

#[tokio::test]
async fn test_second_rejection_surfaces_unauthorized_without_teardown() {
    init_tracing();
    let server = MockServer::start().await;
    let fresh = far_token();

    Mock::given(method("GET"))
        .and(path("/portfolio"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(&server, &fresh, 1).await;

    let (pipeline, vault, guard) = build(&server.uri());
    vault.store_session_token(&far_token()).unwrap();

    let err = pipeline.execute(ApiRequest::get("/portfolio")).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized));
    // The refresh itself succeeded, so the session survives; only this
    // request failed.
    assert_eq!(vault.session_token().unwrap(), Some(fresh));
    assert_eq!(guard.state(), AuthState::Unknown);
}

#[tokio::test]
async fn test_failed_reactive_refresh_tears_the_session_down() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/portfolio"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_string("session revoked"))
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, vault, guard) = build(&server.uri());
    vault.store_session_token(&far_token()).unwrap();

    let err = pipeline.execute(ApiRequest::get("/portfolio")).await.unwrap_err();
    assert!(matches!(err, AppError::Refresh(_)));
    assert_eq!(vault.session_token().unwrap(), None);
    assert_eq!(guard.state(), AuthState::Unauthenticated { return_path: None });
}

#[tokio::test]
async fn test_concurrent_requests_share_one_refresh() {
    init_tracing();
    let server = MockServer::start().await;
    let fresh = far_token();

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "token": fresh }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wallet"))
        .respond_with(ResponseTemplate::new(200))
        .expect(6)
        .mount(&server)
        .await;

    let (pipeline, vault, _guard) = build(&server.uri());
    vault.store_session_token(&near_expiry_token()).unwrap();

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.execute(ApiRequest::get("/wallet")).await })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        task.unwrap().unwrap();
    }
    // expect(1) on the refresh mock verifies the single flight on drop.
}

#[tokio::test]
async fn test_parked_requests_replay_in_arrival_order() {
    init_tracing();
    let server = MockServer::start().await;
    let fresh = far_token();

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "token": fresh }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    for endpoint in ["/first", "/a", "/b", "/c"] {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
    }

    let (pipeline, vault, _guard) = build(&server.uri());
    vault.store_session_token(&near_expiry_token()).unwrap();

    // The first request triggers the refresh; the rest arrive while it is
    // in flight and park behind it.
    let trigger = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.execute(ApiRequest::get("/first")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut parked = Vec::new();
    for endpoint in ["/a", "/b", "/c"] {
        let pipeline = pipeline.clone();
        parked.push(tokio::spawn(async move {
            pipeline.execute(ApiRequest::get(endpoint)).await
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    trigger.await.unwrap().unwrap();
    for task in parked {
        task.await.unwrap().unwrap();
    }

    let order: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .filter(|p| p != "/auth/refresh")
        .collect();
    assert_eq!(order, ["/first", "/a", "/b", "/c"]);
}
