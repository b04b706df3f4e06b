//! Keyed submission rate limiting
//!
//! A sliding-window limiter keyed by listener pubkey, applied at the API
//! boundary before any storage is touched. This is deployment-level
//! flood protection; the per-session interval rule in the rule engine is
//! what actually bounds credit accrual. The trait keeps the backing store
//! injectable so a multi-instance deployment can swap in a shared
//! counter.

use earshot_common::config::EngagementConfig;
use earshot_common::error::{Error, Result};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// Check-and-record one attempt for a key
pub trait RateGate: Send + Sync {
    /// Returns true when the attempt is allowed
    fn check(&self, key: &str) -> bool;
}

/// In-memory keyed limiter for single-instance deployments
pub struct KeyedRateGate {
    limiter: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
}

impl KeyedRateGate {
    /// One permit per configured heartbeat interval, with a small burst
    /// allowance for legitimate client catch-up
    pub fn from_config(cfg: &EngagementConfig) -> Result<Self> {
        let period = Duration::from_millis(cfg.min_heartbeat_interval_ms as u64);
        let burst = NonZeroU32::new(cfg.heartbeat_burst)
            .ok_or_else(|| Error::Config("heartbeat burst must be nonzero".to_string()))?;
        let quota = Quota::with_period(period)
            .ok_or_else(|| Error::Config("heartbeat interval must be nonzero".to_string()))?
            .allow_burst(burst);

        Ok(Self {
            limiter: RateLimiter::keyed(quota),
        })
    }
}

impl RateGate for KeyedRateGate {
    fn check(&self, key: &str) -> bool {
        self.limiter.check_key(&key.to_string()).is_ok()
    }
}

/// Gate that admits everything; for tests and trusted deployments
pub struct OpenRateGate;

impl RateGate for OpenRateGate {
    fn check(&self, _key: &str) -> bool {
        true
    }
}
