//! Authorization token validation
//!
//! Privileged requests carry an `Authorization` header of the form
//! `Event <base64>`, where the payload is a signed event of kind
//! [`KIND_HTTP_AUTH`](crate::event::KIND_HTTP_AUTH) scoped to one
//! method+URL pair and valid for a bounded window from its creation
//! timestamp.
//!
//! Validation order is fixed: signature, kind, freshness, method binding,
//! URL binding. Method and URL are both enforced strictly so a token
//! minted for one endpoint cannot be replayed against another endpoint of
//! the same method.
//!
//! This module contains ONLY pure functions. No HTTP framework
//! dependencies; response mapping lives in service code.

use crate::event::{EventError, SignedEvent, KIND_HTTP_AUTH};
use crate::time::now;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

/// Header scheme prefix for authorization tokens
pub const AUTH_SCHEME: &str = "Event ";

/// Tag carrying the target absolute URL
pub const TAG_URL: &str = "u";

/// Tag carrying the HTTP method
pub const TAG_METHOD: &str = "method";

/// Authorization token validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Token is not decodable into a signed event
    #[error("Malformed authorization token: {0}")]
    Malformed(String),

    /// Event signature does not verify
    #[error("Invalid token signature")]
    InvalidSignature,

    /// Event kind is not the authorization kind
    #[error("Wrong event kind: expected {expected}, got {got}")]
    WrongEventKind { expected: u32, got: u32 },

    /// Token creation timestamp outside the freshness window
    #[error("Token timestamp {created_at} outside window ({delta_secs}s from server time)")]
    StaleOrFutureTimestamp { created_at: i64, delta_secs: i64 },

    /// Method tag does not match the request method
    #[error("Token method mismatch: token is for {token}, request is {request}")]
    MethodMismatch { token: String, request: String },

    /// URL tag does not match the request URL
    #[error("Token URL mismatch: token is for {token}, request is {request}")]
    UrlMismatch { token: String, request: String },
}

impl From<EventError> for AuthError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Malformed(msg) => AuthError::Malformed(msg),
            EventError::InvalidSignature => AuthError::InvalidSignature,
        }
    }
}

/// Decode an `Authorization` header value into a signed event
///
/// Accepts the raw base64 payload with or without the `Event ` scheme
/// prefix.
pub fn decode_token(header_value: &str) -> Result<SignedEvent, AuthError> {
    let payload = header_value
        .strip_prefix(AUTH_SCHEME)
        .unwrap_or(header_value)
        .trim();

    let bytes = BASE64
        .decode(payload)
        .map_err(|e| AuthError::Malformed(format!("base64 decode failed: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::Malformed(format!("token is not a signed event: {}", e)))
}

/// Validate an authorization token against the current request
///
/// Returns the authenticated public key (hex) on success. Checks run in
/// fixed order and short-circuit on first failure:
///
/// 1. Cryptographic signature over the event
/// 2. Event kind equals the authorization kind
/// 3. `|now - created_at| <= window_secs` (replay defense)
/// 4. Method tag matches the request method
/// 5. URL tag matches the request URL exactly
pub fn verify_auth_token(
    header_value: &str,
    request_method: &str,
    request_url: &str,
    window_secs: i64,
) -> Result<String, AuthError> {
    let event = decode_token(header_value)?;

    event.verify()?;

    if event.kind != KIND_HTTP_AUTH {
        return Err(AuthError::WrongEventKind {
            expected: KIND_HTTP_AUTH,
            got: event.kind,
        });
    }

    let delta_secs = (now().timestamp() - event.created_at).abs();
    if delta_secs > window_secs {
        return Err(AuthError::StaleOrFutureTimestamp {
            created_at: event.created_at,
            delta_secs,
        });
    }

    let token_method = event.tag_value(TAG_METHOD).unwrap_or("");
    if !token_method.eq_ignore_ascii_case(request_method) {
        return Err(AuthError::MethodMismatch {
            token: token_method.to_string(),
            request: request_method.to_string(),
        });
    }

    let token_url = event.tag_value(TAG_URL).unwrap_or("");
    if token_url != request_url {
        return Err(AuthError::UrlMismatch {
            token: token_url.to_string(),
            request: request_url.to_string(),
        });
    }

    Ok(event.pubkey)
}
