//! HTTP request handlers
//!
//! Every privileged endpoint authenticates the caller through the signed
//! authorization token before touching the engagement or payout pipeline.
//! The acting public key always comes from the verified token, never from
//! the request body alone.

use crate::engagement;
use crate::error::{Error, Result};
use crate::state::AppContext;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use earshot_common::auth::{verify_auth_token, AuthError};
use earshot_common::db::models::EngagementSession;
use earshot_common::event::SignedEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    pub session_id: Uuid,
    pub track_id: Uuid,
    pub listener_pubkey: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub success: bool,
    pub session: EngagementSession,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub success: bool,
    pub credited: u32,
    pub eligible: bool,
    pub duplicated: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub success: bool,
    pub credited_seconds: u32,
    pub eligible: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutRequest {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutResponse {
    pub success: bool,
    pub payout_id: Uuid,
    pub amount_sats: u64,
    pub preimage: String,
}

// ============================================================================
// Authorization
// ============================================================================

/// Verify the request's authorization token and return the caller pubkey
///
/// Tokens are bound to one method+URL pair; the URL is reconstructed from
/// the configured public base URL plus the route path and compared
/// exactly.
fn authorize(ctx: &AppContext, headers: &HeaderMap, method: &str, path: &str) -> Result<String> {
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            Error::Auth(AuthError::Malformed(
                "missing Authorization header".to_string(),
            ))
        })?;

    let url = format!("{}{}", ctx.auth.public_url, path);
    let pubkey = verify_auth_token(header_value, method, &url, ctx.auth.window_secs)?;
    Ok(pubkey)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "engagement_payout".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /engagement/session - Begin a listening session
pub async fn start_session(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<SessionResponse>> {
    let pubkey = authorize(&ctx, &headers, "POST", "/engagement/session")?;
    if req.listener_pubkey != pubkey {
        return Err(Error::BadRequest(
            "listener pubkey does not match authorization token".to_string(),
        ));
    }

    let session =
        engagement::start_session(&ctx.db, req.session_id, req.track_id, &pubkey).await?;

    Ok(Json(SessionResponse {
        success: true,
        session,
    }))
}

/// POST /engagement/heartbeat - Submit one signed heartbeat event
pub async fn submit_heartbeat(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(event): Json<SignedEvent>,
) -> Result<Json<HeartbeatResponse>> {
    let pubkey = authorize(&ctx, &headers, "POST", "/engagement/heartbeat")?;
    if event.pubkey != pubkey {
        return Err(Error::BadRequest(
            "heartbeat pubkey does not match authorization token".to_string(),
        ));
    }

    if !ctx.rate_gate.check(&pubkey) {
        return Err(Error::RateLimited);
    }

    let outcome =
        engagement::accept_heartbeat(&ctx.db, &ctx.locks, &ctx.engagement, &event).await?;

    Ok(Json(HeartbeatResponse {
        success: true,
        credited: outcome.credited_seconds,
        eligible: outcome.eligible,
        duplicated: outcome.duplicated,
    }))
}

/// POST /engagement/finalize - End-of-playback signal
pub async fn finalize_session(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(req): Json<FinalizeRequest>,
) -> Result<Json<FinalizeResponse>> {
    let pubkey = authorize(&ctx, &headers, "POST", "/engagement/finalize")?;

    let (credited_seconds, eligible) =
        engagement::finalize_session(&ctx.db, &ctx.locks, req.session_id, &pubkey).await?;

    Ok(Json(FinalizeResponse {
        success: true,
        credited_seconds,
        eligible,
    }))
}

/// POST /payout/trigger - Settle an eligible session
pub async fn trigger_payout(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(req): Json<PayoutRequest>,
) -> Result<Json<PayoutResponse>> {
    authorize(&ctx, &headers, "POST", "/payout/trigger")?;

    let outcome = ctx.payouts.trigger(req.session_id).await?;

    Ok(Json(PayoutResponse {
        success: true,
        payout_id: outcome.payout_id,
        amount_sats: outcome.amount_sats,
        preimage: outcome.preimage,
    }))
}
