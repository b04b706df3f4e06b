//! Error types for earshot-poe
//!
//! Defines service-specific error types using thiserror for clear error
//! propagation. Validation and consistency failures are structured results
//! with machine-readable reason codes; nothing in this module should ever
//! crash the process.

use crate::engagement::rules::RejectReason;
use crate::wallet::client::WalletError;
use earshot_common::auth::AuthError;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for the earshot-poe service
#[derive(Error, Debug)]
pub enum Error {
    /// Authorization token validation failure
    #[error("Authorization failed: {0}")]
    Auth(#[from] AuthError),

    /// Heartbeat rejected by a validation rule
    #[error("Heartbeat rejected: {0}")]
    Heartbeat(RejectReason),

    /// Session does not exist
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    /// Session is in a terminal state
    #[error("Session already completed: {0}")]
    SessionAlreadyCompleted(Uuid),

    /// Acting pubkey does not own the session
    #[error("Session owner mismatch: {0}")]
    SessionOwnerMismatch(Uuid),

    /// Per-pubkey submission rate exceeded
    #[error("Rate limited")]
    RateLimited,

    /// Session has not crossed the eligibility threshold
    #[error("Session not eligible for payout: {0}")]
    NotEligible(Uuid),

    /// No usable wallet credential for the track's artist
    #[error("Artist wallet not connected: {0}")]
    WalletNotConnected(String),

    /// A payout record already exists for this session
    #[error("Session already has a payout: {0}")]
    AlreadyPaid(Uuid),

    /// Wallet protocol failure with classification
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Errors from the common library
    #[error(transparent)]
    Common(#[from] earshot_common::Error),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Machine-readable reason code for API responses
    pub fn reason_code(&self) -> &'static str {
        match self {
            Error::Auth(AuthError::Malformed(_)) => "auth_malformed",
            Error::Auth(AuthError::InvalidSignature) => "auth_invalid_signature",
            Error::Auth(AuthError::WrongEventKind { .. }) => "auth_wrong_event_kind",
            Error::Auth(AuthError::StaleOrFutureTimestamp { .. }) => "auth_stale_timestamp",
            Error::Auth(AuthError::MethodMismatch { .. }) => "auth_method_mismatch",
            Error::Auth(AuthError::UrlMismatch { .. }) => "auth_url_mismatch",
            Error::Heartbeat(reason) => reason.code(),
            Error::SessionNotFound(_) => "session_not_found",
            Error::SessionAlreadyCompleted(_) => "session_already_completed",
            Error::SessionOwnerMismatch(_) => "session_owner_mismatch",
            Error::RateLimited => "rate_limited",
            Error::NotEligible(_) => "not_eligible",
            Error::WalletNotConnected(_) => "wallet_not_connected",
            Error::AlreadyPaid(_) => "already_paid",
            Error::Wallet(WalletError::QuotaExceeded(_)) => "wallet_quota_exceeded",
            Error::Wallet(WalletError::InsufficientBalance(_)) => "wallet_insufficient_balance",
            Error::Wallet(WalletError::Timeout) => "wallet_timeout",
            Error::Wallet(WalletError::InvalidCredential(_)) => "wallet_invalid_credential",
            Error::Wallet(WalletError::Unknown(_)) => "wallet_error",
            Error::Database(_) => "database_error",
            Error::Common(_) => "internal_error",
            Error::BadRequest(_) => "bad_request",
            Error::Internal(_) => "internal_error",
        }
    }
}

/// Convenience Result type using earshot-poe Error
pub type Result<T> = std::result::Result<T, Error>;
