//! HTTP-level tests: authorization enforcement, the engagement endpoints,
//! and keyed rate limiting, driven through the router with in-process
//! requests.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use earshot_common::config::AuthConfig;
use earshot_poe::api::create_router;
use earshot_poe::payout::PayoutEngine;
use earshot_poe::ratelimit::{KeyedRateGate, OpenRateGate};
use earshot_poe::state::AppContext;
use earshot_poe::wallet::HttpWalletFactory;
use helpers::*;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const BASE_URL: &str = "http://localhost:5750";

async fn test_context(env: &TestEnv, rate_gate: Arc<dyn earshot_poe::ratelimit::RateGate>) -> AppContext {
    let wallet_cfg = earshot_common::config::WalletConfig {
        retry_attempts: 1,
        backoff_ms: 1,
        timeout_secs: 1,
        master_key: None,
        treasury_connection: None,
    };

    let payouts = Arc::new(PayoutEngine::new(
        env.pool.clone(),
        env.locks.clone(),
        test_payout_config(),
        None,
        None,
        Arc::new(HttpWalletFactory::new(wallet_cfg)),
    ));

    AppContext {
        db: env.pool.clone(),
        auth: Arc::new(AuthConfig {
            window_secs: 60,
            public_url: BASE_URL.to_string(),
        }),
        engagement: Arc::new(test_engagement_config()),
        locks: env.locks.clone(),
        rate_gate,
        payouts,
    }
}

fn post(path: &str, auth: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(token) = auth {
        builder = builder.header("authorization", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let env = setup_env().await;
    let app = create_router(test_context(&env, Arc::new(OpenRateGate)).await);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_missing_authorization_rejected() {
    let env = setup_env().await;
    let app = create_router(test_context(&env, Arc::new(OpenRateGate)).await);
    let listener = TestKey::generate();

    let event = listener.heartbeat(&heartbeat_payload(Uuid::new_v4(), Uuid::new_v4(), 0));
    let response = app
        .oneshot(post(
            "/engagement/heartbeat",
            None,
            serde_json::to_value(&event).unwrap(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["reason"], "auth_malformed");
}

#[tokio::test]
async fn test_token_for_other_endpoint_rejected() {
    let env = setup_env().await;
    let app = create_router(test_context(&env, Arc::new(OpenRateGate)).await);
    let listener = TestKey::generate();

    // Minted for finalize, replayed against heartbeat
    let token = listener.auth_header("POST", &format!("{}/engagement/finalize", BASE_URL));
    let event = listener.heartbeat(&heartbeat_payload(Uuid::new_v4(), Uuid::new_v4(), 0));
    let response = app
        .oneshot(post(
            "/engagement/heartbeat",
            Some(&token),
            serde_json::to_value(&event).unwrap(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["reason"], "auth_url_mismatch");
}

#[tokio::test]
async fn test_session_and_heartbeat_flow() {
    let env = setup_env().await;
    let app = create_router(test_context(&env, Arc::new(OpenRateGate)).await);
    let listener = TestKey::generate();
    let session_id = Uuid::new_v4();
    let track_id = Uuid::new_v4();

    // Start the session
    let token = listener.auth_header("POST", &format!("{}/engagement/session", BASE_URL));
    let response = app
        .clone()
        .oneshot(post(
            "/engagement/session",
            Some(&token),
            serde_json::json!({
                "sessionId": session_id,
                "trackId": track_id,
                "listenerPubkey": listener.pubkey(),
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["session"]["creditedSeconds"], 0);
    assert_eq!(body["session"]["status"], "ACTIVE");

    // Submit a heartbeat
    let token = listener.auth_header("POST", &format!("{}/engagement/heartbeat", BASE_URL));
    let event = listener.heartbeat(&heartbeat_payload(session_id, track_id, 5_000));
    let response = app
        .clone()
        .oneshot(post(
            "/engagement/heartbeat",
            Some(&token),
            serde_json::to_value(&event).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["credited"], 5);
    assert_eq!(body["eligible"], false);
    assert_eq!(body["duplicated"], false);

    // Replay the same event
    let response = app
        .clone()
        .oneshot(post(
            "/engagement/heartbeat",
            Some(&token),
            serde_json::to_value(&event).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["credited"], 5);
    assert_eq!(body["duplicated"], true);

    // Finalize
    let token = listener.auth_header("POST", &format!("{}/engagement/finalize", BASE_URL));
    let response = app
        .oneshot(post(
            "/engagement/finalize",
            Some(&token),
            serde_json::json!({ "sessionId": session_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["creditedSeconds"], 5);
    assert_eq!(body["eligible"], false);
}

#[tokio::test]
async fn test_heartbeat_for_foreign_pubkey_rejected() {
    let env = setup_env().await;
    let app = create_router(test_context(&env, Arc::new(OpenRateGate)).await);
    let listener = TestKey::generate();
    let intruder = TestKey::generate();

    // Valid token for the intruder, heartbeat signed by the listener
    let token = intruder.auth_header("POST", &format!("{}/engagement/heartbeat", BASE_URL));
    let event = listener.heartbeat(&heartbeat_payload(Uuid::new_v4(), Uuid::new_v4(), 0));
    let response = app
        .oneshot(post(
            "/engagement/heartbeat",
            Some(&token),
            serde_json::to_value(&event).unwrap(),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_keyed_rate_limit_returns_429() {
    let env = setup_env().await;
    let mut cfg = test_engagement_config();
    cfg.min_heartbeat_interval_ms = 60_000;
    cfg.heartbeat_burst = 1;
    let gate = Arc::new(KeyedRateGate::from_config(&cfg).unwrap());
    let app = create_router(test_context(&env, gate).await);
    let listener = TestKey::generate();

    let token = listener.auth_header("POST", &format!("{}/engagement/heartbeat", BASE_URL));
    let event = listener.heartbeat(&heartbeat_payload(Uuid::new_v4(), Uuid::new_v4(), 0));

    // First request consumes the burst allowance (and 404s on the session)
    let response = app
        .clone()
        .oneshot(post(
            "/engagement/heartbeat",
            Some(&token),
            serde_json::to_value(&event).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Second request inside the window is rate limited
    let response = app
        .oneshot(post(
            "/engagement/heartbeat",
            Some(&token),
            serde_json::to_value(&event).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["reason"], "rate_limited");
}
