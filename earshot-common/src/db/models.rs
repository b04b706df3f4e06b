//! Persisted data models
//!
//! Row structs for the engagement/payout tables plus the mapping helpers
//! shared by the query code. Timestamps are stored as RFC 3339 strings;
//! ids as UUID strings; client-reported times as epoch milliseconds.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

/// Engagement session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Accepting heartbeats
    Active,
    /// Terminal; no further heartbeats accepted
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(SessionStatus::Active),
            "COMPLETED" => Ok(SessionStatus::Completed),
            other => Err(Error::Internal(format!("unknown session status: {}", other))),
        }
    }
}

/// One listener's attempt to accrue credit for one track play
///
/// `credited_seconds` only ever grows, and only via accepted heartbeats.
/// `eligible_at` is set once, the moment credited time first crosses the
/// eligibility threshold, and never cleared. Sessions are never deleted;
/// they serve as the payout audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementSession {
    pub session_id: Uuid,
    pub track_id: Uuid,
    pub listener_pubkey: String,
    pub credited_seconds: u32,
    pub last_position_ms: Option<u64>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_client_ts: Option<i64>,
    pub eligible_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl EngagementSession {
    pub fn is_eligible(&self) -> bool {
        self.eligible_at.is_some()
    }

    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            session_id: parse_uuid(&row.get::<String, _>("session_id"))?,
            track_id: parse_uuid(&row.get::<String, _>("track_id"))?,
            listener_pubkey: row.get("listener_pubkey"),
            credited_seconds: row.get::<i64, _>("credited_seconds") as u32,
            last_position_ms: row
                .get::<Option<i64>, _>("last_position_ms")
                .map(|v| v as u64),
            last_heartbeat_at: parse_optional_ts(row.get("last_heartbeat_at"))?,
            last_client_ts: row.get("last_client_ts"),
            eligible_at: parse_optional_ts(row.get("eligible_at"))?,
            status: SessionStatus::parse(&row.get::<String, _>("status"))?,
            created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        })
    }
}

/// One accepted, signed heartbeat event
///
/// Existence of a receipt means the event id has been processed and must
/// never be credited again. Created once, never mutated, never deleted.
#[derive(Debug, Clone)]
pub struct HeartbeatReceipt {
    pub event_id: String,
    pub session_id: Uuid,
    pub accepted_at: DateTime<Utc>,
}

/// Payout settlement state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    /// Created before any wallet call; settlement in flight or stuck
    Pending,
    /// Treasury payment confirmed by preimage
    Completed,
    /// Terminal wallet failure or reconciled-stale attempt
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "PENDING",
            PayoutStatus::Completed => "COMPLETED",
            PayoutStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(PayoutStatus::Pending),
            "COMPLETED" => Ok(PayoutStatus::Completed),
            "FAILED" => Ok(PayoutStatus::Failed),
            other => Err(Error::Internal(format!("unknown payout status: {}", other))),
        }
    }
}

/// One settlement attempt against a session
///
/// At most one payout row exists per session (UNIQUE constraint).
/// `amount_sats` is computed once and immutable; `preimage` is set only on
/// COMPLETED and is the proof the treasury actually paid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payout {
    pub payout_id: Uuid,
    pub session_id: Uuid,
    pub amount_sats: u64,
    pub status: PayoutStatus,
    pub preimage: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Payout {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            payout_id: parse_uuid(&row.get::<String, _>("payout_id"))?,
            session_id: parse_uuid(&row.get::<String, _>("session_id"))?,
            amount_sats: row.get::<i64, _>("amount_sats") as u64,
            status: PayoutStatus::parse(&row.get::<String, _>("status"))?,
            preimage: row.get("preimage"),
            failure_reason: row.get("failure_reason"),
            created_at: parse_ts(&row.get::<String, _>("created_at"))?,
            settled_at: parse_optional_ts(row.get("settled_at"))?,
        })
    }
}

/// Artist's encrypted wallet connection credential
///
/// A capability record: given this row and the server AES key, produce a
/// usable connection string. Owned by exactly one artist pubkey; written
/// by the (out of scope) profile flow, consumed by payout settlement.
#[derive(Debug, Clone)]
pub struct ArtistWallet {
    pub artist_pubkey: String,
    pub ciphertext: String,
    pub nonce: String,
    pub updated_at: DateTime<Utc>,
}

impl ArtistWallet {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            artist_pubkey: row.get("artist_pubkey"),
            ciphertext: row.get("ciphertext"),
            nonce: row.get("nonce"),
            updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("invalid uuid '{}': {}", s, e)))
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("invalid timestamp '{}': {}", s, e)))
}

fn parse_optional_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|v| parse_ts(&v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_round_trip() {
        for status in [SessionStatus::Active, SessionStatus::Completed] {
            assert_eq!(SessionStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(SessionStatus::parse("PAUSED").is_err());
    }

    #[test]
    fn test_payout_status_round_trip() {
        for status in [
            PayoutStatus::Pending,
            PayoutStatus::Completed,
            PayoutStatus::Failed,
        ] {
            assert_eq!(PayoutStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(PayoutStatus::parse("SETTLING").is_err());
    }

    #[test]
    fn test_timestamp_parsing() {
        let dt = parse_ts("2026-08-07T12:00:00+00:00").unwrap();
        assert_eq!(dt.timestamp(), 1_786_104_000);
        assert!(parse_ts("yesterday").is_err());
        assert_eq!(parse_optional_ts(None).unwrap(), None);
    }
}
