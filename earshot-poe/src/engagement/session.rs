//! Engagement session state machine
//!
//! Owns the lifecycle of one listening session: `ACTIVE` until finalized,
//! then `COMPLETED` (terminal, no transitions out). Credited time moves in
//! exactly one place, the accept-heartbeat pipeline, and always by the
//! configured per-heartbeat grant. Finalizing a session deliberately grants
//! nothing: only signed, rate-limited heartbeats may ever increase credit.
//!
//! Heartbeats for the same session are serialized through the per-session
//! lock registry; the receipt insert and session update commit in one
//! transaction so a heartbeat is never partially applied.

use crate::engagement::rules::{self, HeartbeatPayload};
use crate::error::{Error, Result};
use crate::state::SessionLocks;
use chrono::{DateTime, Utc};
use earshot_common::config::EngagementConfig;
use earshot_common::db::models::{EngagementSession, SessionStatus};
use earshot_common::event::SignedEvent;
use earshot_common::time;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

/// Result of one accepted (or replayed) heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    /// Total credited seconds after this submission
    pub credited_seconds: u32,
    /// Whether the session has crossed the eligibility threshold
    pub eligible: bool,
    /// True when the event id had already been processed
    pub duplicated: bool,
}

/// Create a session in `ACTIVE` state with zero credited seconds
///
/// Idempotent: starting twice with the same id (concurrent tabs, retries)
/// returns the existing session instead of erroring, as long as the caller
/// is the owner and the track matches.
pub async fn start_session(
    pool: &SqlitePool,
    session_id: Uuid,
    track_id: Uuid,
    listener_pubkey: &str,
) -> Result<EngagementSession> {
    sqlx::query(
        r#"
        INSERT INTO engagement_sessions (session_id, track_id, listener_pubkey, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(session_id) DO NOTHING
        "#,
    )
    .bind(session_id.to_string())
    .bind(track_id.to_string())
    .bind(listener_pubkey)
    .bind(time::now().to_rfc3339())
    .execute(pool)
    .await?;

    let session = load_session(pool, session_id)
        .await?
        .ok_or(Error::SessionNotFound(session_id))?;

    if session.listener_pubkey != listener_pubkey {
        return Err(Error::SessionOwnerMismatch(session_id));
    }
    if session.track_id != track_id {
        return Err(Error::BadRequest(format!(
            "session {} already exists for a different track",
            session_id
        )));
    }

    debug!(session_id = %session_id, track_id = %track_id, "engagement session started");
    Ok(session)
}

/// Load a session by id
pub async fn load_session(
    pool: &SqlitePool,
    session_id: Uuid,
) -> Result<Option<EngagementSession>> {
    let row = sqlx::query(
        r#"
        SELECT session_id, track_id, listener_pubkey, credited_seconds,
               last_position_ms, last_heartbeat_at, last_client_ts,
               eligible_at, status, created_at
        FROM engagement_sessions
        WHERE session_id = ?
        "#,
    )
    .bind(session_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| EngagementSession::from_row(&r).map_err(Error::Common))
        .transpose()
}

/// Process one heartbeat submission end to end
///
/// Pipeline order is fixed: structure/content/timing rules, replay ledger,
/// session lookup + ownership, position rule, interval rule, then the
/// atomic receipt+credit application. Replays of an already-processed
/// event id are benign and return success without mutation.
pub async fn accept_heartbeat(
    pool: &SqlitePool,
    locks: &SessionLocks,
    cfg: &EngagementConfig,
    event: &SignedEvent,
) -> Result<HeartbeatOutcome> {
    // Stateless rules first; no storage touched for garbage input.
    let payload = rules::check_structure(event).map_err(Error::Heartbeat)?;
    rules::check_content(&payload, cfg).map_err(Error::Heartbeat)?;
    rules::check_timing(&payload, time::now_ms(), cfg).map_err(Error::Heartbeat)?;

    // Serialize the read-modify-write for this session. Duplicate tabs
    // racing on the same session must not double-credit.
    let _guard = locks.acquire(payload.session_id).await;

    if receipt_exists(pool, &event.id).await? {
        return replayed_outcome(pool, &payload).await;
    }

    let session = load_session(pool, payload.session_id)
        .await?
        .ok_or(Error::SessionNotFound(payload.session_id))?;

    if session.status == SessionStatus::Completed {
        return Err(Error::SessionAlreadyCompleted(session.session_id));
    }
    if session.listener_pubkey != event.pubkey {
        return Err(Error::SessionOwnerMismatch(session.session_id));
    }
    if session.track_id != payload.track_id {
        return Err(Error::Heartbeat(rules::RejectReason::TrackMismatch));
    }

    rules::check_position(&payload, session.last_position_ms, cfg).map_err(Error::Heartbeat)?;

    let now = time::now();
    rules::check_interval(session.last_heartbeat_at, now, cfg).map_err(Error::Heartbeat)?;

    apply_heartbeat(pool, cfg, &session, &payload, &event.id, now).await
}

/// Terminal end-of-playback transition
///
/// Verifies ownership, then moves the session to `COMPLETED` if it is not
/// already there. Returns the final credited seconds and eligibility flag.
pub async fn finalize_session(
    pool: &SqlitePool,
    locks: &SessionLocks,
    session_id: Uuid,
    listener_pubkey: &str,
) -> Result<(u32, bool)> {
    let _guard = locks.acquire(session_id).await;

    let session = load_session(pool, session_id)
        .await?
        .ok_or(Error::SessionNotFound(session_id))?;

    if session.listener_pubkey != listener_pubkey {
        return Err(Error::SessionOwnerMismatch(session_id));
    }

    if session.status == SessionStatus::Active {
        sqlx::query("UPDATE engagement_sessions SET status = ? WHERE session_id = ?")
            .bind(SessionStatus::Completed.as_str())
            .bind(session_id.to_string())
            .execute(pool)
            .await?;
        info!(
            session_id = %session_id,
            credited_seconds = session.credited_seconds,
            eligible = session.is_eligible(),
            "engagement session finalized"
        );
    }

    Ok((session.credited_seconds, session.is_eligible()))
}

async fn receipt_exists(pool: &SqlitePool, event_id: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM heartbeat_receipts WHERE event_id = ?")
            .bind(event_id)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

/// Success-without-mutation response for an already-processed event id
async fn replayed_outcome(
    pool: &SqlitePool,
    payload: &HeartbeatPayload,
) -> Result<HeartbeatOutcome> {
    let session = load_session(pool, payload.session_id)
        .await?
        .ok_or(Error::SessionNotFound(payload.session_id))?;

    Ok(HeartbeatOutcome {
        credited_seconds: session.credited_seconds,
        eligible: session.is_eligible(),
        duplicated: true,
    })
}

/// Atomically record the receipt and apply the credit
///
/// The receipt insert and the session update commit together or not at
/// all. A concurrent writer that slipped in the same event id loses to the
/// primary key and is reported as a replay, not an error.
async fn apply_heartbeat(
    pool: &SqlitePool,
    cfg: &EngagementConfig,
    session: &EngagementSession,
    payload: &HeartbeatPayload,
    event_id: &str,
    now: DateTime<Utc>,
) -> Result<HeartbeatOutcome> {
    let new_credited = session
        .credited_seconds
        .saturating_add(cfg.heartbeat_credit_secs);

    // Set once, never cleared
    let newly_eligible =
        session.eligible_at.is_none() && new_credited >= cfg.eligibility_threshold_secs;
    let eligible_at = match (&session.eligible_at, newly_eligible) {
        (Some(at), _) => Some(*at),
        (None, true) => Some(now),
        (None, false) => None,
    };

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        "INSERT INTO heartbeat_receipts (event_id, session_id, accepted_at) VALUES (?, ?, ?)",
    )
    .bind(event_id)
    .bind(session.session_id.to_string())
    .bind(now.to_rfc3339())
    .execute(&mut *tx)
    .await;

    if let Err(err) = inserted {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                tx.rollback().await?;
                return Ok(HeartbeatOutcome {
                    credited_seconds: session.credited_seconds,
                    eligible: session.is_eligible(),
                    duplicated: true,
                });
            }
        }
        return Err(err.into());
    }

    sqlx::query(
        r#"
        UPDATE engagement_sessions
        SET credited_seconds = ?,
            last_position_ms = ?,
            last_heartbeat_at = ?,
            last_client_ts = ?,
            eligible_at = ?
        WHERE session_id = ?
        "#,
    )
    .bind(new_credited as i64)
    .bind(payload.position_ms as i64)
    .bind(now.to_rfc3339())
    .bind(payload.client_ts)
    .bind(eligible_at.map(|dt| dt.to_rfc3339()))
    .bind(session.session_id.to_string())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    if newly_eligible {
        info!(
            session_id = %session.session_id,
            credited_seconds = new_credited,
            "session crossed eligibility threshold"
        );
    } else {
        debug!(
            session_id = %session.session_id,
            credited_seconds = new_credited,
            position_ms = payload.position_ms,
            "heartbeat accepted"
        );
    }

    Ok(HeartbeatOutcome {
        credited_seconds: new_credited,
        eligible: eligible_at.is_some(),
        duplicated: false,
    })
}
