//! Shared service state
//!
//! The application context handed to every handler, plus the per-session
//! lock registry that serializes read-modify-write cycles on one session
//! while letting different sessions proceed concurrently.

use crate::payout::PayoutEngine;
use crate::ratelimit::RateGate;
use earshot_common::config::{AuthConfig, EngagementConfig};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Registry of per-session async locks
///
/// Heartbeats and payout triggers for the same session serialize on the
/// session's lock; the registry itself is only held long enough to clone
/// the entry out. Entries are small and sessions are long-lived audit
/// records, so the map is never pruned.
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one session, waiting if another task holds it
    pub async fn acquire(&self, session_id: Uuid) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().expect("session lock registry poisoned");
            Arc::clone(map.entry(session_id).or_default())
        };
        entry.lock_owned().await
    }
}

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub db: SqlitePool,
    pub auth: Arc<AuthConfig>,
    pub engagement: Arc<EngagementConfig>,
    pub locks: SessionLocks,
    pub rate_gate: Arc<dyn RateGate>,
    pub payouts: Arc<PayoutEngine>,
}
