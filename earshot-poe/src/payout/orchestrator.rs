//! Payout orchestrator
//!
//! Turns one eligible engagement session into one settled Lightning
//! payment: resolve the artist's wallet, compute the amount, record a
//! PENDING payout, create the invoice on the artist's wallet, pay it from
//! the treasury, and persist the preimage.
//!
//! The PENDING row is written before any network call so a crash mid-
//! settlement leaves an observable, auditable attempt rather than silence.
//! At most one payout row ever exists per session: the pre-check runs
//! under the session lock, and the UNIQUE constraint on `session_id`
//! catches anything that races past it.

use crate::engagement::session::load_session;
use crate::error::{Error, Result};
use crate::payout::calculator::calculate_amount_sats;
use crate::state::SessionLocks;
use crate::wallet::cipher::WalletCipher;
use crate::wallet::client::WalletError;
use crate::wallet::store::load_wallet_for_track;
use crate::wallet::WalletFactory;
use chrono::Duration;
use earshot_common::config::PayoutConfig;
use earshot_common::db::models::{Payout, PayoutStatus};
use earshot_common::time;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of a settled payout
#[derive(Debug, Clone)]
pub struct PayoutOutcome {
    pub payout_id: Uuid,
    pub amount_sats: u64,
    pub preimage: String,
}

/// Coordinates eligibility checks, wallet calls, and payout persistence
pub struct PayoutEngine {
    pool: SqlitePool,
    locks: SessionLocks,
    cfg: PayoutConfig,
    cipher: Option<Arc<WalletCipher>>,
    treasury_connection: Option<String>,
    wallets: Arc<dyn WalletFactory>,
}

impl PayoutEngine {
    pub fn new(
        pool: SqlitePool,
        locks: SessionLocks,
        cfg: PayoutConfig,
        cipher: Option<Arc<WalletCipher>>,
        treasury_connection: Option<String>,
        wallets: Arc<dyn WalletFactory>,
    ) -> Self {
        Self {
            pool,
            locks,
            cfg,
            cipher,
            treasury_connection,
            wallets,
        }
    }

    /// Settle one eligible session
    ///
    /// Runs to completion once started: either a COMPLETED payout with a
    /// preimage, a classified failure recorded on the payout row, or a
    /// PENDING row awaiting reconciliation after a timeout. There is no
    /// mid-flight cancellation; partial cancellation of a payment is
    /// unsafe.
    pub async fn trigger(&self, session_id: Uuid) -> Result<PayoutOutcome> {
        let session = load_session(&self.pool, session_id)
            .await?
            .ok_or(Error::SessionNotFound(session_id))?;

        if !session.is_eligible() {
            return Err(Error::NotEligible(session_id));
        }

        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| Error::Internal("wallet credential key not configured".to_string()))?;
        let treasury_connection = self
            .treasury_connection
            .as_deref()
            .ok_or_else(|| Error::Internal("treasury wallet not configured".to_string()))?;

        let artist_connection =
            load_wallet_for_track(&self.pool, cipher.as_ref(), session.track_id).await?;

        let amount_sats = calculate_amount_sats(session.credited_seconds, &self.cfg);
        let payout_id = Uuid::new_v4();

        // Existing-payout check and PENDING insert run under the session
        // lock; concurrent triggers must not both pass the check.
        {
            let _guard = self.locks.acquire(session_id).await;

            if let Some(existing) = self.load_payout(session_id).await? {
                warn!(
                    session_id = %session_id,
                    payout_id = %existing.payout_id,
                    status = existing.status.as_str(),
                    "payout trigger rejected: payout already exists"
                );
                return Err(Error::AlreadyPaid(session_id));
            }

            self.insert_pending(payout_id, session_id, amount_sats).await?;
        }

        info!(
            session_id = %session_id,
            payout_id = %payout_id,
            amount_sats,
            "payout attempt started"
        );

        let memo = format!("Earshot listening payout for session {}", session_id);
        let settlement = self
            .settle(&artist_connection, treasury_connection, amount_sats, &memo)
            .await;

        match settlement {
            Ok(preimage) => {
                self.mark_completed(payout_id, &preimage).await?;
                info!(payout_id = %payout_id, "payout completed");
                Ok(PayoutOutcome {
                    payout_id,
                    amount_sats,
                    preimage,
                })
            }
            Err(wallet_err) => {
                if matches!(wallet_err, WalletError::Timeout) {
                    // The payment may have gone through; never re-pay
                    // blindly. Reconciliation handles over-age rows.
                    warn!(
                        payout_id = %payout_id,
                        "wallet timeout, payout left PENDING for reconciliation"
                    );
                } else {
                    error!(
                        payout_id = %payout_id,
                        error = %wallet_err,
                        "payout failed terminally"
                    );
                    self.mark_failed(payout_id, &wallet_err.to_string()).await?;
                }
                Err(Error::Wallet(wallet_err))
            }
        }
    }

    /// Invoice on the artist wallet, then pay from the treasury
    async fn settle(
        &self,
        artist_connection: &str,
        treasury_connection: &str,
        amount_sats: u64,
        memo: &str,
    ) -> std::result::Result<String, WalletError> {
        let artist_wallet = self.wallets.connect(artist_connection)?;
        let invoice = artist_wallet.make_invoice(amount_sats, memo).await?;

        let treasury_wallet = self.wallets.connect(treasury_connection)?;
        treasury_wallet.pay_invoice(&invoice).await
    }

    /// Load the payout for a session, if any
    pub async fn load_payout(&self, session_id: Uuid) -> Result<Option<Payout>> {
        let row = sqlx::query(
            r#"
            SELECT payout_id, session_id, amount_sats, status, preimage,
                   failure_reason, created_at, settled_at
            FROM payouts
            WHERE session_id = ?
            "#,
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Payout::from_row(&r).map_err(Error::Common))
            .transpose()
    }

    async fn insert_pending(
        &self,
        payout_id: Uuid,
        session_id: Uuid,
        amount_sats: u64,
    ) -> Result<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO payouts (payout_id, session_id, amount_sats, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(payout_id.to_string())
        .bind(session_id.to_string())
        .bind(amount_sats as i64)
        .bind(PayoutStatus::Pending.as_str())
        .bind(time::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::AlreadyPaid(session_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn mark_completed(&self, payout_id: Uuid, preimage: &str) -> Result<()> {
        sqlx::query(
            "UPDATE payouts SET status = ?, preimage = ?, settled_at = ? WHERE payout_id = ?",
        )
        .bind(PayoutStatus::Completed.as_str())
        .bind(preimage)
        .bind(time::now().to_rfc3339())
        .bind(payout_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, payout_id: Uuid, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE payouts SET status = ?, failure_reason = ? WHERE payout_id = ?",
        )
        .bind(PayoutStatus::Failed.as_str())
        .bind(reason)
        .bind(payout_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fail PENDING payouts older than the configured age bound
    ///
    /// Run at service start. A payout stuck PENDING past the bound will
    /// never be completed by the process that created it; flipping it to
    /// FAILED with an explicit reason puts it in front of an operator
    /// instead of leaving it invisible.
    pub async fn reconcile_stuck_payouts(&self) -> Result<u64> {
        let cutoff = time::now() - Duration::seconds(self.cfg.pending_max_age_secs);

        let result = sqlx::query(
            r#"
            UPDATE payouts
            SET status = ?, failure_reason = 'reconciled: pending beyond age bound'
            WHERE status = ? AND created_at < ?
            "#,
        )
        .bind(PayoutStatus::Failed.as_str())
        .bind(PayoutStatus::Pending.as_str())
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let reconciled = result.rows_affected();
        if reconciled > 0 {
            warn!(reconciled, "stale PENDING payouts marked FAILED");
        }
        Ok(reconciled)
    }
}
