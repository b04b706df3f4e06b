//! Heartbeat rule engine
//!
//! Stateless predicates over one heartbeat event. Each returns a
//! [`RejectReason`] on failure; the session layer applies them in fixed
//! order and short-circuits on the first failure. Every threshold comes
//! from [`EngagementConfig`], never a hard-coded constant.
//!
//! Crediting a fixed grant per *accepted* heartbeat means the only levers
//! an attacker holds are heartbeat frequency (bounded by the interval
//! rule) and heartbeat validity (bounded by everything else). Client-
//! reported elapsed time is never trusted.

use chrono::{DateTime, Utc};
use earshot_common::config::EngagementConfig;
use earshot_common::event::{SignedEvent, KIND_ENGAGEMENT_PING};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Structured heartbeat payload
///
/// Parsed from the signed event content exactly once at this boundary;
/// the rest of the pipeline consumes the typed value. All fields are
/// required; a payload missing any of them is rejected as malformed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub track_id: Uuid,
    pub session_id: Uuid,
    pub position_ms: u64,
    /// Client-reported wall-clock time, epoch milliseconds
    pub client_ts: i64,
    pub is_playing: bool,
    pub playback_rate: f64,
    pub volume: f64,
    pub tab_visible: bool,
}

/// Why a heartbeat was rejected
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RejectReason {
    #[error("invalid event signature")]
    InvalidSignature,

    #[error("wrong event kind: {0}")]
    WrongEventKind(u32),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("playback is not active")]
    NotPlaying,

    #[error("listening tab is not visible")]
    TabHidden,

    #[error("volume {volume} below floor {floor}")]
    VolumeTooLow { volume: f64, floor: f64 },

    #[error("playback rate {0} outside accepted band")]
    PlaybackRateOutOfRange(f64),

    #[error("client timestamp skew {skew_ms}ms exceeds {max_ms}ms")]
    ClockSkewExceeded { skew_ms: i64, max_ms: i64 },

    #[error("position jumped {jump_ms}ms (max {max_ms}ms)")]
    PositionJump { jump_ms: u64, max_ms: u64 },

    #[error("heartbeat arrived {elapsed_ms}ms after previous (min {min_ms}ms)")]
    TooSoon { elapsed_ms: i64, min_ms: i64 },

    #[error("heartbeat track does not match session track")]
    TrackMismatch,
}

impl RejectReason {
    /// Machine-readable reason code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::InvalidSignature => "invalid_signature",
            RejectReason::WrongEventKind(_) => "wrong_event_kind",
            RejectReason::MalformedPayload(_) => "malformed_payload",
            RejectReason::NotPlaying => "not_playing",
            RejectReason::TabHidden => "tab_hidden",
            RejectReason::VolumeTooLow { .. } => "volume_too_low",
            RejectReason::PlaybackRateOutOfRange(_) => "playback_rate_out_of_range",
            RejectReason::ClockSkewExceeded { .. } => "clock_skew_exceeded",
            RejectReason::PositionJump { .. } => "position_jump",
            RejectReason::TooSoon { .. } => "too_soon",
            RejectReason::TrackMismatch => "track_mismatch",
        }
    }
}

/// Structure rule: signature, kind, and payload shape
pub fn check_structure(event: &SignedEvent) -> Result<HeartbeatPayload, RejectReason> {
    if event.verify().is_err() {
        return Err(RejectReason::InvalidSignature);
    }

    if event.kind != KIND_ENGAGEMENT_PING {
        return Err(RejectReason::WrongEventKind(event.kind));
    }

    serde_json::from_str(&event.content)
        .map_err(|e| RejectReason::MalformedPayload(e.to_string()))
}

/// Content rule: the heartbeat must describe real, audible, foreground
/// playback at normal speed
pub fn check_content(
    payload: &HeartbeatPayload,
    cfg: &EngagementConfig,
) -> Result<(), RejectReason> {
    if !payload.is_playing {
        return Err(RejectReason::NotPlaying);
    }

    if !payload.tab_visible {
        return Err(RejectReason::TabHidden);
    }

    if payload.volume < cfg.min_volume {
        return Err(RejectReason::VolumeTooLow {
            volume: payload.volume,
            floor: cfg.min_volume,
        });
    }

    if payload.playback_rate < cfg.min_playback_rate
        || payload.playback_rate > cfg.max_playback_rate
    {
        return Err(RejectReason::PlaybackRateOutOfRange(payload.playback_rate));
    }

    Ok(())
}

/// Timing rule: client clock must agree with the server within the
/// configured skew window
pub fn check_timing(
    payload: &HeartbeatPayload,
    server_now_ms: i64,
    cfg: &EngagementConfig,
) -> Result<(), RejectReason> {
    let skew_ms = (server_now_ms - payload.client_ts).abs();
    if skew_ms > cfg.max_clock_skew_ms {
        return Err(RejectReason::ClockSkewExceeded {
            skew_ms,
            max_ms: cfg.max_clock_skew_ms,
        });
    }
    Ok(())
}

/// Position rule: the reported position may only drift a bounded distance
/// from the last accepted position, in either direction
///
/// The first heartbeat of a session has no reference position and is
/// exempt.
pub fn check_position(
    payload: &HeartbeatPayload,
    last_position_ms: Option<u64>,
    cfg: &EngagementConfig,
) -> Result<(), RejectReason> {
    let Some(last) = last_position_ms else {
        return Ok(());
    };

    let jump_ms = payload.position_ms.abs_diff(last);
    if jump_ms > cfg.max_position_jump_ms {
        return Err(RejectReason::PositionJump {
            jump_ms,
            max_ms: cfg.max_position_jump_ms,
        });
    }
    Ok(())
}

/// Interval rule: accepted heartbeats may not arrive faster than the
/// configured minimum spacing
///
/// Applied by the session layer against the last *accepted* heartbeat's
/// wall-clock time; rejected submissions do not move the reference point.
pub fn check_interval(
    last_heartbeat_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cfg: &EngagementConfig,
) -> Result<(), RejectReason> {
    let Some(last) = last_heartbeat_at else {
        return Ok(());
    };

    let elapsed_ms = (now - last).num_milliseconds();
    if elapsed_ms < cfg.min_heartbeat_interval_ms {
        return Err(RejectReason::TooSoon {
            elapsed_ms,
            min_ms: cfg.min_heartbeat_interval_ms,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_config() -> EngagementConfig {
        EngagementConfig {
            heartbeat_credit_secs: 5,
            eligibility_threshold_secs: 60,
            max_clock_skew_ms: 30_000,
            max_position_jump_ms: 15_000,
            min_volume: 0.1,
            min_playback_rate: 0.75,
            max_playback_rate: 1.25,
            min_heartbeat_interval_ms: 1_000,
            heartbeat_burst: 5,
        }
    }

    fn payload() -> HeartbeatPayload {
        HeartbeatPayload {
            track_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            position_ms: 42_000,
            client_ts: 1_786_000_000_000,
            is_playing: true,
            playback_rate: 1.0,
            volume: 0.8,
            tab_visible: true,
        }
    }

    #[test]
    fn test_content_accepts_normal_playback() {
        assert_eq!(check_content(&payload(), &test_config()), Ok(()));
    }

    #[test]
    fn test_content_rejects_paused() {
        let mut p = payload();
        p.is_playing = false;
        assert_eq!(check_content(&p, &test_config()), Err(RejectReason::NotPlaying));
    }

    #[test]
    fn test_content_rejects_hidden_tab() {
        let mut p = payload();
        p.tab_visible = false;
        assert_eq!(check_content(&p, &test_config()), Err(RejectReason::TabHidden));
    }

    #[test]
    fn test_content_rejects_muted_playback() {
        let mut p = payload();
        p.volume = 0.05;
        assert!(matches!(
            check_content(&p, &test_config()),
            Err(RejectReason::VolumeTooLow { .. })
        ));
    }

    #[test]
    fn test_content_rejects_fast_forward() {
        let mut p = payload();
        p.playback_rate = 2.0;
        assert_eq!(
            check_content(&p, &test_config()),
            Err(RejectReason::PlaybackRateOutOfRange(2.0))
        );

        p.playback_rate = 0.5;
        assert!(check_content(&p, &test_config()).is_err());

        // Band edges are inclusive
        p.playback_rate = 0.75;
        assert!(check_content(&p, &test_config()).is_ok());
        p.playback_rate = 1.25;
        assert!(check_content(&p, &test_config()).is_ok());
    }

    #[test]
    fn test_timing_rejects_backdated_clock() {
        let p = payload();
        let server_now = p.client_ts + 30_001;
        assert!(matches!(
            check_timing(&p, server_now, &test_config()),
            Err(RejectReason::ClockSkewExceeded { .. })
        ));
    }

    #[test]
    fn test_timing_rejects_future_clock() {
        let p = payload();
        let server_now = p.client_ts - 30_001;
        assert!(check_timing(&p, server_now, &test_config()).is_err());
    }

    #[test]
    fn test_timing_accepts_skew_within_window() {
        let p = payload();
        assert!(check_timing(&p, p.client_ts + 29_999, &test_config()).is_ok());
        assert!(check_timing(&p, p.client_ts - 29_999, &test_config()).is_ok());
    }

    #[test]
    fn test_position_first_heartbeat_exempt() {
        assert!(check_position(&payload(), None, &test_config()).is_ok());
    }

    #[test]
    fn test_position_rejects_forward_seek() {
        let mut p = payload();
        p.position_ms = 42_000 + 30_000;
        assert!(matches!(
            check_position(&p, Some(42_000), &test_config()),
            Err(RejectReason::PositionJump { jump_ms: 30_000, .. })
        ));
    }

    #[test]
    fn test_position_rejects_backward_seek() {
        let mut p = payload();
        p.position_ms = 42_000 - 20_000;
        assert!(check_position(&p, Some(42_000), &test_config()).is_err());
    }

    #[test]
    fn test_position_accepts_jitter() {
        let mut p = payload();
        p.position_ms = 42_000 + 5_000;
        assert!(check_position(&p, Some(42_000), &test_config()).is_ok());
        p.position_ms = 42_000 - 5_000;
        assert!(check_position(&p, Some(42_000), &test_config()).is_ok());
    }

    #[test]
    fn test_interval_first_heartbeat_exempt() {
        assert!(check_interval(None, Utc::now(), &test_config()).is_ok());
    }

    #[test]
    fn test_interval_rejects_burst() {
        let now = Utc::now();
        let last = now - Duration::milliseconds(500);
        assert!(matches!(
            check_interval(Some(last), now, &test_config()),
            Err(RejectReason::TooSoon { .. })
        ));
    }

    #[test]
    fn test_interval_accepts_spaced_heartbeats() {
        let now = Utc::now();
        let last = now - Duration::milliseconds(1_500);
        assert!(check_interval(Some(last), now, &test_config()).is_ok());
    }

    #[test]
    fn test_payload_requires_all_fields() {
        let missing_volume = r#"{
            "trackId": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
            "sessionId": "3fa85f64-5717-4562-b3fc-2c963f66afa7",
            "positionMs": 1000,
            "clientTs": 1786000000000,
            "isPlaying": true,
            "playbackRate": 1.0,
            "tabVisible": true
        }"#;
        assert!(serde_json::from_str::<HeartbeatPayload>(missing_volume).is_err());
    }
}
