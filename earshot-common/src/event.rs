//! Signed event model
//!
//! All privileged client input arrives as signed events: a fixed record
//! carrying the author's public key, a kind number, a tag set, free-form
//! content, and an ed25519 signature over the event's canonical hash.
//! Verification is pure; nothing here touches storage or the network.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Event kind for HTTP authorization tokens
pub const KIND_HTTP_AUTH: u32 = 27235;

/// Event kind for engagement ping (heartbeat) events
pub const KIND_ENGAGEMENT_PING: u32 = 33838;

/// Event verification errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    /// Event is structurally broken (bad hex, wrong lengths, unparseable)
    #[error("Malformed event: {0}")]
    Malformed(String),

    /// Signature does not verify against the claimed public key
    #[error("Invalid event signature")]
    InvalidSignature,
}

/// Simple tag wrapper preserving tag fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a two-element tag (name, value)
    pub fn pair(name: &str, value: &str) -> Self {
        Tag(vec![name.to_string(), value.to_string()])
    }

    /// Tag name (first element), if present
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Tag value (second element), if present
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// A signed client event
///
/// The event id is the hex SHA-256 of the canonical serialization
/// `[0, pubkey, created_at, kind, tags, content]`; the signature is
/// ed25519 over the raw 32-byte id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignedEvent {
    /// Event identifier (hex of SHA-256 over the canonical form)
    pub id: String,
    /// Author public key (hex ed25519)
    pub pubkey: String,
    /// Kind number, e.g. [`KIND_HTTP_AUTH`]
    pub kind: u32,
    /// Unix timestamp (seconds) of creation
    pub created_at: i64,
    /// Arbitrary tags
    pub tags: Vec<Tag>,
    /// Event content body
    pub content: String,
    /// Signature over the event hash (hex)
    pub sig: String,
}

impl SignedEvent {
    /// Canonical serialization used for id computation
    ///
    /// Compact JSON (no whitespace), fields in fixed order. Every signer
    /// and verifier must agree on this byte sequence exactly.
    pub fn canonical_form(&self) -> String {
        serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ])
        .to_string()
    }

    /// Compute the event id (hex SHA-256 of the canonical form)
    pub fn compute_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_form().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Value of the first tag with the given name, if any
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name() == Some(name))
            .and_then(Tag::value)
    }

    /// Verify the event id and signature
    ///
    /// Recomputes the canonical id, then checks the ed25519 signature over
    /// the raw id bytes against the claimed public key. A stale or
    /// recomputed-mismatched id fails as an invalid signature: the signed
    /// bytes are not the bytes presented.
    pub fn verify(&self) -> Result<(), EventError> {
        let computed = self.compute_id();
        if computed != self.id {
            return Err(EventError::InvalidSignature);
        }

        let id_bytes = hex::decode(&self.id)
            .map_err(|e| EventError::Malformed(format!("event id is not hex: {}", e)))?;

        let pubkey_bytes: [u8; 32] = hex::decode(&self.pubkey)
            .map_err(|e| EventError::Malformed(format!("pubkey is not hex: {}", e)))?
            .try_into()
            .map_err(|_| EventError::Malformed("pubkey must be 32 bytes".to_string()))?;

        let sig_bytes: [u8; 64] = hex::decode(&self.sig)
            .map_err(|e| EventError::Malformed(format!("signature is not hex: {}", e)))?
            .try_into()
            .map_err(|_| EventError::Malformed("signature must be 64 bytes".to_string()))?;

        let verifying_key = VerifyingKey::from_bytes(&pubkey_bytes)
            .map_err(|_| EventError::Malformed("pubkey is not a valid ed25519 key".to_string()))?;
        let signature = Signature::from_bytes(&sig_bytes);

        verifying_key
            .verify(&id_bytes, &signature)
            .map_err(|_| EventError::InvalidSignature)
    }
}
