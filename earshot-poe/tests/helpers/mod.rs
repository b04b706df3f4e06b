//! Shared test helpers: scratch databases, signing keys, event builders

#![allow(dead_code)]

use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore;
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

use earshot_common::auth::{AUTH_SCHEME, TAG_METHOD, TAG_URL};
use earshot_common::config::{EngagementConfig, PayoutConfig};
use earshot_common::db::init_database;
use earshot_common::event::{SignedEvent, Tag, KIND_ENGAGEMENT_PING, KIND_HTTP_AUTH};
use earshot_common::time;
use earshot_poe::state::SessionLocks;

/// A listener (or artist) with a signing identity
pub struct TestKey {
    pub key: SigningKey,
}

impl TestKey {
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn pubkey(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    /// Build and sign an event of the given kind
    pub fn sign(&self, kind: u32, tags: Vec<Tag>, content: String) -> SignedEvent {
        let mut event = SignedEvent {
            id: String::new(),
            pubkey: self.pubkey(),
            kind,
            created_at: time::now().timestamp(),
            tags,
            content,
            sig: String::new(),
        };
        event.id = event.compute_id();
        let id_bytes = hex::decode(&event.id).unwrap();
        event.sig = hex::encode(self.key.sign(&id_bytes).to_bytes());
        event
    }

    /// Signed heartbeat event for the given payload
    pub fn heartbeat(&self, payload: &serde_json::Value) -> SignedEvent {
        self.sign(KIND_ENGAGEMENT_PING, Vec::new(), payload.to_string())
    }

    /// Authorization header value bound to one method+URL pair
    pub fn auth_header(&self, method: &str, url: &str) -> String {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;

        let event = self.sign(
            KIND_HTTP_AUTH,
            vec![Tag::pair(TAG_METHOD, method), Tag::pair(TAG_URL, url)],
            String::new(),
        );
        format!(
            "{}{}",
            AUTH_SCHEME,
            BASE64.encode(serde_json::to_vec(&event).unwrap())
        )
    }
}

/// A well-formed heartbeat payload at the given position
pub fn heartbeat_payload(session_id: Uuid, track_id: Uuid, position_ms: u64) -> serde_json::Value {
    serde_json::json!({
        "trackId": track_id,
        "sessionId": session_id,
        "positionMs": position_ms,
        "clientTs": time::now_ms(),
        "isPlaying": true,
        "playbackRate": 1.0,
        "volume": 0.8,
        "tabVisible": true,
    })
}

/// Engagement config for tests: tiny interval so sequential heartbeats in
/// a test body are accepted without long sleeps
pub fn test_engagement_config() -> EngagementConfig {
    EngagementConfig {
        heartbeat_credit_secs: 5,
        eligibility_threshold_secs: 60,
        max_clock_skew_ms: 30_000,
        max_position_jump_ms: 15_000,
        min_volume: 0.1,
        min_playback_rate: 0.75,
        max_playback_rate: 1.25,
        min_heartbeat_interval_ms: 1,
        heartbeat_burst: 100,
    }
}

pub fn test_payout_config() -> PayoutConfig {
    PayoutConfig {
        rate_sats_per_sec: 1,
        ceiling_sats: 1_000,
        pending_max_age_secs: 3_600,
    }
}

/// Scratch database plus the shared lock registry
pub struct TestEnv {
    pub pool: SqlitePool,
    pub locks: SessionLocks,
    _dir: TempDir,
}

pub async fn setup_env() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("earshot-test.db"))
        .await
        .unwrap();
    TestEnv {
        pool,
        locks: SessionLocks::new(),
        _dir: dir,
    }
}

/// Force a session into the eligible state without replaying heartbeats
pub async fn force_eligible(pool: &SqlitePool, session_id: Uuid, credited_seconds: u32) {
    sqlx::query(
        "UPDATE engagement_sessions SET credited_seconds = ?, eligible_at = ? WHERE session_id = ?",
    )
    .bind(credited_seconds as i64)
    .bind(time::now().to_rfc3339())
    .bind(session_id.to_string())
    .execute(pool)
    .await
    .unwrap();
}
