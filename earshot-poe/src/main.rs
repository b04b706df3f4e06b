//! Engagement/payout service (earshot-poe) - Main entry point
//!
//! Hosts the proof-of-engagement pipeline and Lightning payout settlement
//! behind an HTTP API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use earshot_common::config::{AuthConfig, EngagementConfig, PayoutConfig, WalletConfig};
use earshot_common::db::init_database;
use earshot_poe::payout::PayoutEngine;
use earshot_poe::ratelimit::KeyedRateGate;
use earshot_poe::state::{AppContext, SessionLocks};
use earshot_poe::wallet::{HttpWalletFactory, WalletCipher};
use earshot_poe::api;

/// Command-line arguments for earshot-poe
#[derive(Parser, Debug)]
#[command(name = "earshot-poe")]
#[command(about = "Proof-of-engagement and payout service for Earshot")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5750", env = "EARSHOT_POE_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(short, long, default_value = "earshot.db", env = "EARSHOT_DB_PATH")]
    db_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "earshot_poe=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting Earshot engagement/payout service on port {}", args.port);

    // Load configuration from environment
    let auth = AuthConfig::from_env().context("Failed to load auth configuration")?;
    let engagement =
        EngagementConfig::from_env().context("Failed to load engagement configuration")?;
    let payout_cfg = PayoutConfig::from_env().context("Failed to load payout configuration")?;
    let wallet_cfg = WalletConfig::from_env().context("Failed to load wallet configuration")?;

    // Initialize database
    let db = init_database(&args.db_path)
        .await
        .context("Failed to initialize database")?;

    let cipher = wallet_cfg.master_key.map(|key| Arc::new(WalletCipher::new(&key)));
    if cipher.is_none() {
        warn!("EARSHOT_WALLET_KEY not set; payout settlement is disabled");
    }
    if wallet_cfg.treasury_connection.is_none() {
        warn!("EARSHOT_TREASURY_WALLET not set; payout settlement is disabled");
    }

    let locks = SessionLocks::new();
    let payouts = Arc::new(PayoutEngine::new(
        db.clone(),
        locks.clone(),
        payout_cfg,
        cipher,
        wallet_cfg.treasury_connection.clone(),
        Arc::new(HttpWalletFactory::new(wallet_cfg)),
    ));

    // Fail over-age PENDING payouts from previous runs before accepting
    // new triggers
    let reconciled = payouts
        .reconcile_stuck_payouts()
        .await
        .context("Failed to reconcile stuck payouts")?;
    if reconciled > 0 {
        warn!(reconciled, "reconciled stuck payouts from previous run");
    }

    let rate_gate =
        Arc::new(KeyedRateGate::from_config(&engagement).context("Failed to build rate limiter")?);

    let ctx = AppContext {
        db,
        auth: Arc::new(auth),
        engagement: Arc::new(engagement),
        locks,
        rate_gate,
        payouts,
    };

    api::run(ctx, args.port).await.context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}
