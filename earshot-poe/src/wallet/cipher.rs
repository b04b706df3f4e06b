//! Wallet credential encryption at rest
//!
//! AES-256-GCM under a server-held key. The stored record is the hex
//! ciphertext plus the hex 96-bit nonce; the GCM auth tag is appended to
//! the ciphertext per AEAD convention. This module only implements the
//! narrow encrypt/decrypt contract; key management and the profile flow
//! that writes credentials live elsewhere.

use crate::wallet::client::WalletError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

/// Symmetric cipher for wallet connection strings
pub struct WalletCipher {
    cipher: Aes256Gcm,
}

impl WalletCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        // 32-byte key length is enforced by the type
        let cipher = Aes256Gcm::new_from_slice(key).expect("AES-256 key must be 32 bytes");
        Self { cipher }
    }

    /// Encrypt a connection string; returns (ciphertext hex, nonce hex)
    pub fn encrypt(&self, secret: &str) -> Result<(String, String), WalletError> {
        let mut nonce_bytes = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, secret.as_bytes())
            .map_err(|_| WalletError::InvalidCredential("encryption failed".to_string()))?;

        Ok((hex::encode(ciphertext), hex::encode(nonce_bytes)))
    }

    /// Decrypt a stored credential back to the connection string
    ///
    /// Fails cleanly on a wrong key, tampered ciphertext, or corrupt
    /// nonce; the auth tag check makes tampering detectable.
    pub fn decrypt(&self, ciphertext_hex: &str, nonce_hex: &str) -> Result<String, WalletError> {
        let ciphertext = hex::decode(ciphertext_hex)
            .map_err(|_| WalletError::InvalidCredential("ciphertext is not hex".to_string()))?;
        let nonce_bytes: [u8; 12] = hex::decode(nonce_hex)
            .map_err(|_| WalletError::InvalidCredential("nonce is not hex".to_string()))?
            .try_into()
            .map_err(|_| WalletError::InvalidCredential("nonce must be 12 bytes".to_string()))?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| {
                WalletError::InvalidCredential("credential decryption failed".to_string())
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| WalletError::InvalidCredential("credential is not UTF-8".to_string()))
    }
}
