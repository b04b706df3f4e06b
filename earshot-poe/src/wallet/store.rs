//! Wallet credential storage
//!
//! Resolves a track to its artist's decrypted wallet connection string,
//! and provides the write half used by the profile flow and operational
//! tooling. Credentials are only ever held decrypted in memory for the
//! duration of a payout attempt.

use crate::error::{Error, Result};
use crate::wallet::cipher::WalletCipher;
use earshot_common::db::models::ArtistWallet;
use earshot_common::time;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Record a track's owning artist
pub async fn register_track(
    pool: &SqlitePool,
    track_id: Uuid,
    artist_pubkey: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tracks (track_id, artist_pubkey, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT(track_id) DO UPDATE SET artist_pubkey = excluded.artist_pubkey
        "#,
    )
    .bind(track_id.to_string())
    .bind(artist_pubkey)
    .bind(time::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Encrypt and upsert an artist's wallet connection string
pub async fn save_artist_wallet(
    pool: &SqlitePool,
    cipher: &WalletCipher,
    artist_pubkey: &str,
    connection: &str,
) -> Result<()> {
    let (ciphertext, nonce) = cipher.encrypt(connection)?;

    sqlx::query(
        r#"
        INSERT INTO artist_wallets (artist_pubkey, ciphertext, nonce, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(artist_pubkey) DO UPDATE SET
            ciphertext = excluded.ciphertext,
            nonce = excluded.nonce,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(artist_pubkey)
    .bind(&ciphertext)
    .bind(&nonce)
    .bind(time::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Resolve the decrypted wallet connection string for a track's artist
///
/// Fails with `WalletNotConnected` when the track has no known artist or
/// the artist has not connected a wallet.
pub async fn load_wallet_for_track(
    pool: &SqlitePool,
    cipher: &WalletCipher,
    track_id: Uuid,
) -> Result<String> {
    let artist_pubkey: Option<String> =
        sqlx::query_scalar("SELECT artist_pubkey FROM tracks WHERE track_id = ?")
            .bind(track_id.to_string())
            .fetch_optional(pool)
            .await?;

    let artist_pubkey = artist_pubkey
        .ok_or_else(|| Error::WalletNotConnected(format!("no artist for track {}", track_id)))?;

    let row = sqlx::query(
        "SELECT artist_pubkey, ciphertext, nonce, updated_at FROM artist_wallets WHERE artist_pubkey = ?",
    )
    .bind(&artist_pubkey)
    .fetch_optional(pool)
    .await?;

    let wallet = match row {
        Some(row) => ArtistWallet::from_row(&row)?,
        None => {
            return Err(Error::WalletNotConnected(format!(
                "artist {} has no wallet",
                artist_pubkey
            )))
        }
    };

    Ok(cipher.decrypt(&wallet.ciphertext, &wallet.nonce)?)
}
