//! Database initialization
//!
//! Creates the engagement/payout schema on first run and opens the
//! connection pool. Schema creation is idempotent; invariants that must
//! hold even under concurrent writers (one receipt per event id, at most
//! one payout per session) are expressed as constraints here, not just as
//! application checks.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers with one writer; heartbeat traffic is
    // read-heavy with short write transactions.
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_settings_table(&pool).await?;
    create_tracks_table(&pool).await?;
    create_engagement_sessions_table(&pool).await?;
    create_heartbeat_receipts_table(&pool).await?;
    create_payouts_table(&pool).await?;
    create_artist_wallets_table(&pool).await?;

    Ok(pool)
}

async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES ('schema_version', '1')")
        .execute(pool)
        .await?;

    Ok(())
}

/// Minimal track-to-artist mapping
///
/// The catalog itself lives elsewhere; payout settlement only needs to
/// resolve which artist a session's track belongs to.
async fn create_tracks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            track_id TEXT PRIMARY KEY,
            artist_pubkey TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_engagement_sessions_table(pool: &SqlitePool) -> Result<()> {
    // Sessions are never deleted; they are the payout audit trail.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS engagement_sessions (
            session_id TEXT PRIMARY KEY,
            track_id TEXT NOT NULL,
            listener_pubkey TEXT NOT NULL,
            credited_seconds INTEGER NOT NULL DEFAULT 0,
            last_position_ms INTEGER,
            last_heartbeat_at TEXT,
            last_client_ts INTEGER,
            eligible_at TEXT,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sessions_listener
         ON engagement_sessions (listener_pubkey)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_heartbeat_receipts_table(pool: &SqlitePool) -> Result<()> {
    // Replay-rejection ledger: the primary key on event_id is what makes
    // duplicate submission detection race-proof.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS heartbeat_receipts (
            event_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            accepted_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_receipts_session
         ON heartbeat_receipts (session_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_payouts_table(pool: &SqlitePool) -> Result<()> {
    // UNIQUE on session_id enforces at-most-one-payout-per-session even if
    // two triggers race past the application-level check.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payouts (
            payout_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL UNIQUE,
            amount_sats INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            preimage TEXT,
            failure_reason TEXT,
            created_at TEXT NOT NULL,
            settled_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_artist_wallets_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artist_wallets (
            artist_pubkey TEXT PRIMARY KEY,
            ciphertext TEXT NOT NULL,
            nonce TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("test.db")).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        for expected in [
            "artist_wallets",
            "engagement_sessions",
            "heartbeat_receipts",
            "payouts",
            "settings",
            "tracks",
        ] {
            assert!(names.contains(&expected), "missing table {}", expected);
        }
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let pool = init_database(&path).await.unwrap();
        drop(pool);
        // Second open against the same file must not fail
        init_database(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_payout_session_uniqueness_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("test.db")).await.unwrap();

        let insert = "INSERT INTO payouts (payout_id, session_id, amount_sats, status, created_at)
                      VALUES (?, ?, 100, 'PENDING', '2026-01-01T00:00:00Z')";
        sqlx::query(insert)
            .bind("p1")
            .bind("s1")
            .execute(&pool)
            .await
            .unwrap();
        let second = sqlx::query(insert)
            .bind("p2")
            .bind("s1")
            .execute(&pool)
            .await;
        assert!(second.is_err());
    }
}
