//! Integration tests for the authenticated request gateway.
//!
//! Each test stands up a real `axum` server on a loopback socket so the
//! gateway is exercised over a live connection, covering:
//! - Bearer attachment and omission
//! - Single-flight refresh coalescing under concurrent 401s
//! - Expired-token retry success
//! - Refresh failure clearing the session
//! - Retry-exhausted failures surfacing as plain transport errors
//! - Response body text propagation with `HTTP <status>` fallback

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use axum::{
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::future::join_all;
use serde_json::{json, Value};
use url::Url;

use aimusic::{
    config::Config, error::ErrorKind, gateway::Gateway, session::SessionStore,
};

/// Test helper: serve `router` on an ephemeral loopback port.
async fn serve(router: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("should bind loopback listener");
    let addr = listener.local_addr().expect("listener should have an address");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server should run");
    });

    Url::parse(&format!("http://{addr}/")).expect("listener address should be a URL")
}

/// Test helper: gateway plus its session store against `base_url`.
fn setup_gateway(base_url: Url) -> (Gateway, Arc<SessionStore>) {
    let session = Arc::new(SessionStore::in_memory());
    let config = Config::new(base_url);
    let gateway = Gateway::new(&config, Arc::clone(&session)).expect("gateway should build");
    (gateway, session)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
}

/// A refresh endpoint that counts calls, dwells a while so concurrent
/// demands overlap, and rotates the pair.
fn counting_refresh(calls: Arc<AtomicUsize>) -> Router {
    Router::new().route(
        "/api/auth/refresh",
        post(move |Json(body): Json<Value>| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(body["refresh_token"], "refresh-1");

                // Dwell so that every concurrent 401 joins this flight.
                tokio::time::sleep(Duration::from_millis(250)).await;

                Json(json!({
                    "access_token": "fresh",
                    "refresh_token": "refresh-2",
                    "token_type": "bearer"
                }))
            }
        }),
    )
}

/// A data endpoint that accepts only the refreshed access token.
fn fresh_only_data(calls: Arc<AtomicUsize>) -> Router {
    Router::new().route(
        "/api/data",
        get(move |headers: HeaderMap| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                match bearer(&headers) {
                    Some("Bearer fresh") => {
                        (StatusCode::OK, Json(json!({ "value": 7 }))).into_response()
                    }
                    _ => StatusCode::UNAUTHORIZED.into_response(),
                }
            }
        }),
    )
}

// =============================================================================
// Bearer attachment
// =============================================================================

#[tokio::test]
async fn attaches_bearer_when_token_present_and_omits_when_absent() {
    let router = Router::new().route(
        "/api/echo",
        get(|headers: HeaderMap| async move {
            Json(json!({ "authorization": bearer(&headers) }))
        }),
    );
    let base_url = serve(router).await;
    let (gateway, session) = setup_gateway(base_url);

    session.set_tokens("token-1", "refresh-1");
    let seen: Value = gateway.get("/api/echo").await.unwrap();
    assert_eq!(seen["authorization"], "Bearer token-1");

    // After an atomic clear the header is gone, not stale.
    session.clear_tokens();
    let seen: Value = gateway.get("/api/echo").await.unwrap();
    assert_eq!(seen["authorization"], Value::Null);
}

// =============================================================================
// Refresh protocol
// =============================================================================

#[tokio::test]
async fn concurrent_401s_share_one_refresh() {
    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let data_calls = Arc::new(AtomicUsize::new(0));
    let router = counting_refresh(Arc::clone(&refresh_calls))
        .merge(fresh_only_data(Arc::clone(&data_calls)));
    let base_url = serve(router).await;

    let (gateway, session) = setup_gateway(base_url);
    session.set_tokens("stale", "refresh-1");

    let gateway = Arc::new(gateway);
    let requests = (0..8).map(|_| {
        let gateway = Arc::clone(&gateway);
        async move { gateway.get::<Value>("/api/data").await }
    });
    let results = join_all(requests).await;

    // All callers resolve with the same refreshed token, and the refresh
    // endpoint was hit exactly once.
    for result in results {
        assert_eq!(result.unwrap()["value"], 7);
    }
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.access_token().as_deref(), Some("fresh"));
    assert_eq!(session.refresh_token().as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn expired_token_retries_once_after_refresh() {
    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let data_calls = Arc::new(AtomicUsize::new(0));
    let router = counting_refresh(Arc::clone(&refresh_calls))
        .merge(fresh_only_data(Arc::clone(&data_calls)));
    let base_url = serve(router).await;

    let (gateway, session) = setup_gateway(base_url);
    session.set_tokens("stale", "refresh-1");

    let value: Value = gateway.get("/api/data").await.unwrap();
    assert_eq!(value["value"], 7);

    // One original call, one refresh, one reissue.
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(data_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn second_expiry_starts_a_fresh_refresh_cycle() {
    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&refresh_calls);
    let router = Router::new()
        .route(
            "/api/auth/refresh",
            post(move |Json(_): Json<Value>| {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Json(json!({
                        "access_token": format!("fresh-{n}"),
                        "refresh_token": format!("refresh-{n}"),
                        "token_type": "bearer"
                    }))
                }
            }),
        )
        .route(
            "/api/flaky",
            get(|headers: HeaderMap| async move {
                match bearer(&headers) {
                    Some(token) if token.starts_with("Bearer fresh-") => {
                        (StatusCode::OK, Json(json!({ "ok": true }))).into_response()
                    }
                    _ => StatusCode::UNAUTHORIZED.into_response(),
                }
            }),
        );
    let base_url = serve(router).await;

    let (gateway, session) = setup_gateway(base_url);

    session.set_tokens("stale", "seed");
    let _: Value = gateway.get("/api/flaky").await.unwrap();

    // Simulate the next expiry; the cleared in-flight handle must not be
    // reused.
    session.set_tokens("stale-again", "seed");
    let _: Value = gateway.get("/api/flaky").await.unwrap();

    assert_eq!(refresh_calls.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Authentication failures
// =============================================================================

#[tokio::test]
async fn refresh_rejection_clears_tokens_and_surfaces_auth_error() {
    let router = Router::new()
        .route(
            "/api/auth/refresh",
            post(|| async {
                (StatusCode::UNAUTHORIZED, "Invalid refresh token")
            }),
        )
        .route(
            "/api/data",
            get(|| async { StatusCode::UNAUTHORIZED }),
        );
    let base_url = serve(router).await;

    let (gateway, session) = setup_gateway(base_url);
    session.set_tokens("stale", "refresh-1");

    let error = gateway.get::<Value>("/api/data").await.unwrap_err();
    assert!(error.is_unauthenticated());
    assert!(error.to_string().contains("Invalid refresh token"));

    // No stale "logged in" state survives an unrecoverable refresh failure.
    assert_eq!(session.access_token(), None);
    assert_eq!(session.refresh_token(), None);
}

#[tokio::test]
async fn missing_refresh_token_clears_and_fails_as_auth_error() {
    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&refresh_calls);
    let router = Router::new()
        .route(
            "/api/auth/refresh",
            post(move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    StatusCode::UNAUTHORIZED
                }
            }),
        )
        .route("/api/data", get(|| async { StatusCode::UNAUTHORIZED }));
    let base_url = serve(router).await;

    let (gateway, session) = setup_gateway(base_url);

    let error = gateway.get::<Value>("/api/data").await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Unauthenticated);
    assert!(error.to_string().contains("missing refresh token"));

    // The refresh endpoint is never spent without a token to send.
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 0);
    assert_eq!(session.access_token(), None);
}

// =============================================================================
// Transport failures
// =============================================================================

#[tokio::test]
async fn retry_exhausted_failure_is_transport_not_auth() {
    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let router = counting_refresh(Arc::clone(&refresh_calls)).route(
        "/api/data",
        get(|headers: HeaderMap| async move {
            match bearer(&headers) {
                // Even the fresh token hits a server-side failure.
                Some("Bearer fresh") => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "render farm on fire").into_response()
                }
                _ => StatusCode::UNAUTHORIZED.into_response(),
            }
        }),
    );
    let base_url = serve(router).await;

    let (gateway, session) = setup_gateway(base_url);
    session.set_tokens("stale", "refresh-1");

    let error = gateway.get::<Value>("/api/data").await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Internal);
    assert!(error.to_string().contains("render farm on fire"));

    // Credentials are valid; the refreshed pair stays put.
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.access_token().as_deref(), Some("fresh"));
}

#[tokio::test]
async fn error_carries_body_text_or_status_fallback() {
    let router = Router::new()
        .route(
            "/api/bad",
            get(|| async { (StatusCode::BAD_REQUEST, "duration out of range (1-300)") }),
        )
        .route("/api/empty", get(|| async { StatusCode::IM_A_TEAPOT }));
    let base_url = serve(router).await;

    let (gateway, _session) = setup_gateway(base_url);

    let error = gateway.get::<Value>("/api/bad").await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::InvalidArgument);
    assert!(error.to_string().contains("duration out of range"));

    let error = gateway.get::<Value>("/api/empty").await.unwrap_err();
    assert!(error.to_string().contains("HTTP 418"));
}

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn login_stores_the_issued_pair() {
    let router = Router::new().route(
        "/api/auth/login",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["email"], "user@example.com");
            assert_eq!(body["password"], "hunter2");
            Json(json!({
                "access_token": "access-0",
                "refresh_token": "refresh-0",
                "token_type": "bearer"
            }))
        }),
    );
    let base_url = serve(router).await;

    let (gateway, session) = setup_gateway(base_url);
    assert!(!session.is_authenticated());

    gateway.login("user@example.com", "hunter2").await.unwrap();

    assert!(session.is_authenticated());
    assert_eq!(session.access_token().as_deref(), Some("access-0"));
    assert_eq!(session.refresh_token().as_deref(), Some("refresh-0"));
}
