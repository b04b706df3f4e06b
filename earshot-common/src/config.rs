//! Configuration loading
//!
//! All engagement and payout tunables are environment-sourced so that
//! deployments can adjust fraud thresholds and payout economics without a
//! code change. Each config struct documents its variables and defaults;
//! `from_env()` validates ranges and fails startup on nonsense values
//! rather than running with them.

use crate::error::{Error, Result};
use std::str::FromStr;

/// Authorization token settings
///
/// | Variable | Default |
/// |---|---|
/// | `EARSHOT_AUTH_WINDOW_SECS` | 60 |
/// | `EARSHOT_PUBLIC_URL` | `http://localhost:5750` |
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Freshness window for authorization tokens, seconds
    pub window_secs: i64,
    /// Public base URL used for strict URL binding of tokens
    pub public_url: String,
}

/// Heartbeat validation and crediting settings
///
/// | Variable | Default |
/// |---|---|
/// | `EARSHOT_HEARTBEAT_CREDIT_SECS` | 5 |
/// | `EARSHOT_ELIGIBILITY_THRESHOLD_SECS` | 60 |
/// | `EARSHOT_MAX_CLOCK_SKEW_MS` | 30000 |
/// | `EARSHOT_MAX_POSITION_JUMP_MS` | 15000 |
/// | `EARSHOT_MIN_VOLUME` | 0.1 |
/// | `EARSHOT_MIN_PLAYBACK_RATE` | 0.75 |
/// | `EARSHOT_MAX_PLAYBACK_RATE` | 1.25 |
/// | `EARSHOT_MIN_HEARTBEAT_INTERVAL_MS` | 4000 |
/// | `EARSHOT_HEARTBEAT_RPS_BURST` | 5 |
#[derive(Debug, Clone)]
pub struct EngagementConfig {
    /// Seconds credited per accepted heartbeat (server grant, never a
    /// client-reported delta)
    pub heartbeat_credit_secs: u32,
    /// Credited seconds at which a session becomes payout-eligible
    pub eligibility_threshold_secs: u32,
    /// Maximum |server - client| clock skew, milliseconds
    pub max_clock_skew_ms: i64,
    /// Maximum accepted playback position delta, milliseconds
    pub max_position_jump_ms: u64,
    /// Volume floor; quieter heartbeats are rejected
    pub min_volume: f64,
    /// Playback rate floor
    pub min_playback_rate: f64,
    /// Playback rate ceiling
    pub max_playback_rate: f64,
    /// Minimum interval between accepted heartbeats, milliseconds
    pub min_heartbeat_interval_ms: i64,
    /// Keyed limiter burst allowance per listener pubkey
    pub heartbeat_burst: u32,
}

/// Payout computation and reconciliation settings
///
/// | Variable | Default |
/// |---|---|
/// | `EARSHOT_RATE_SATS_PER_SEC` | 1 |
/// | `EARSHOT_PAYOUT_CEILING_SATS` | 1000 |
/// | `EARSHOT_PENDING_PAYOUT_MAX_AGE_SECS` | 3600 |
#[derive(Debug, Clone)]
pub struct PayoutConfig {
    /// Satoshis per credited second
    pub rate_sats_per_sec: u64,
    /// Hard ceiling on a single payout, satoshis
    pub ceiling_sats: u64,
    /// Age after which a PENDING payout is failed by reconciliation, seconds
    pub pending_max_age_secs: i64,
}

/// Wallet protocol client settings
///
/// | Variable | Default |
/// |---|---|
/// | `EARSHOT_WALLET_RETRY_ATTEMPTS` | 3 |
/// | `EARSHOT_WALLET_BACKOFF_MS` | 500 |
/// | `EARSHOT_WALLET_TIMEOUT_SECS` | 30 |
/// | `EARSHOT_WALLET_KEY` | (unset) |
/// | `EARSHOT_TREASURY_WALLET` | (unset) |
///
/// `EARSHOT_WALLET_KEY` is the hex-encoded 32-byte AES key protecting
/// stored wallet credentials. `EARSHOT_TREASURY_WALLET` is the platform
/// treasury connection string. Both are required for payouts; the
/// engagement pipeline runs without them.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Attempt budget per wallet call (first try included)
    pub retry_attempts: u32,
    /// Initial retry backoff, milliseconds (doubles per attempt)
    pub backoff_ms: u64,
    /// Per-request timeout, seconds
    pub timeout_secs: u64,
    /// Server-held AES-256 key for credentials at rest
    pub master_key: Option<[u8; 32]>,
    /// Treasury wallet connection string
    pub treasury_connection: Option<String>,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let cfg = Self {
            window_secs: parse_var(lookup, "EARSHOT_AUTH_WINDOW_SECS", 60)?,
            public_url: lookup("EARSHOT_PUBLIC_URL")
                .unwrap_or_else(|| "http://localhost:5750".to_string()),
        };
        if cfg.window_secs <= 0 {
            return Err(Error::Config(
                "EARSHOT_AUTH_WINDOW_SECS must be positive".to_string(),
            ));
        }
        if cfg.public_url.ends_with('/') {
            return Err(Error::Config(
                "EARSHOT_PUBLIC_URL must not end with '/'".to_string(),
            ));
        }
        Ok(cfg)
    }
}

impl EngagementConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let cfg = Self {
            heartbeat_credit_secs: parse_var(lookup, "EARSHOT_HEARTBEAT_CREDIT_SECS", 5)?,
            eligibility_threshold_secs: parse_var(
                lookup,
                "EARSHOT_ELIGIBILITY_THRESHOLD_SECS",
                60,
            )?,
            max_clock_skew_ms: parse_var(lookup, "EARSHOT_MAX_CLOCK_SKEW_MS", 30_000)?,
            max_position_jump_ms: parse_var(lookup, "EARSHOT_MAX_POSITION_JUMP_MS", 15_000)?,
            min_volume: parse_var(lookup, "EARSHOT_MIN_VOLUME", 0.1)?,
            min_playback_rate: parse_var(lookup, "EARSHOT_MIN_PLAYBACK_RATE", 0.75)?,
            max_playback_rate: parse_var(lookup, "EARSHOT_MAX_PLAYBACK_RATE", 1.25)?,
            min_heartbeat_interval_ms: parse_var(
                lookup,
                "EARSHOT_MIN_HEARTBEAT_INTERVAL_MS",
                4_000,
            )?,
            heartbeat_burst: parse_var(lookup, "EARSHOT_HEARTBEAT_RPS_BURST", 5)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.heartbeat_credit_secs == 0 {
            return Err(Error::Config(
                "EARSHOT_HEARTBEAT_CREDIT_SECS must be nonzero".to_string(),
            ));
        }
        if self.eligibility_threshold_secs == 0 {
            return Err(Error::Config(
                "EARSHOT_ELIGIBILITY_THRESHOLD_SECS must be nonzero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_volume) {
            return Err(Error::Config(
                "EARSHOT_MIN_VOLUME must be within [0, 1]".to_string(),
            ));
        }
        if self.min_playback_rate <= 0.0 || self.min_playback_rate >= self.max_playback_rate {
            return Err(Error::Config(
                "playback rate band must satisfy 0 < min < max".to_string(),
            ));
        }
        if self.min_heartbeat_interval_ms <= 0 {
            return Err(Error::Config(
                "EARSHOT_MIN_HEARTBEAT_INTERVAL_MS must be positive".to_string(),
            ));
        }
        if self.heartbeat_burst == 0 {
            return Err(Error::Config(
                "EARSHOT_HEARTBEAT_RPS_BURST must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

impl PayoutConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let cfg = Self {
            rate_sats_per_sec: parse_var(lookup, "EARSHOT_RATE_SATS_PER_SEC", 1)?,
            ceiling_sats: parse_var(lookup, "EARSHOT_PAYOUT_CEILING_SATS", 1_000)?,
            pending_max_age_secs: parse_var(lookup, "EARSHOT_PENDING_PAYOUT_MAX_AGE_SECS", 3_600)?,
        };
        if cfg.ceiling_sats == 0 {
            return Err(Error::Config(
                "EARSHOT_PAYOUT_CEILING_SATS must be nonzero".to_string(),
            ));
        }
        if cfg.pending_max_age_secs <= 0 {
            return Err(Error::Config(
                "EARSHOT_PENDING_PAYOUT_MAX_AGE_SECS must be positive".to_string(),
            ));
        }
        Ok(cfg)
    }
}

impl WalletConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let master_key = match lookup("EARSHOT_WALLET_KEY") {
            Some(hex_key) => {
                let bytes = hex::decode(hex_key.trim()).map_err(|e| {
                    Error::Config(format!("EARSHOT_WALLET_KEY is not hex: {}", e))
                })?;
                let key: [u8; 32] = bytes.try_into().map_err(|_| {
                    Error::Config("EARSHOT_WALLET_KEY must be 32 bytes of hex".to_string())
                })?;
                Some(key)
            }
            None => None,
        };

        let cfg = Self {
            retry_attempts: parse_var(lookup, "EARSHOT_WALLET_RETRY_ATTEMPTS", 3)?,
            backoff_ms: parse_var(lookup, "EARSHOT_WALLET_BACKOFF_MS", 500)?,
            timeout_secs: parse_var(lookup, "EARSHOT_WALLET_TIMEOUT_SECS", 30)?,
            master_key,
            treasury_connection: lookup("EARSHOT_TREASURY_WALLET"),
        };
        if cfg.retry_attempts == 0 {
            return Err(Error::Config(
                "EARSHOT_WALLET_RETRY_ATTEMPTS must be nonzero".to_string(),
            ));
        }
        Ok(cfg)
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Parse an optional environment value with a default
fn parse_var<T: FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| Error::Config(format!("{}: {}", key, e))),
        None => Ok(default),
    }
}
