//! Wallet protocol client
//!
//! Talks to a remote Lightning wallet service over an authenticated
//! request/response protocol: `make_invoice` on an artist's wallet,
//! `pay_invoice` from the treasury wallet. The client holds no session
//! affinity to either side; the same type serves both with different
//! credentials.
//!
//! Every call wraps the protocol round trip in a bounded retry loop with
//! exponential backoff, then surfaces a classified terminal error. Callers
//! use the classification to decide whether an attempt is safely
//! retryable later (`Timeout`) or permanent until external action
//! (`QuotaExceeded`, `InsufficientBalance`).

use async_trait::async_trait;
use earshot_common::config::WalletConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Cap on a single backoff sleep between wallet retries
const MAX_BACKOFF_MS: u64 = 10_000;

/// Classified wallet protocol errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WalletError {
    /// Wallet-imposed rate or spend limit
    #[error("Wallet quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Payer wallet cannot cover the amount
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// No response within the protocol window
    #[error("Wallet request timed out")]
    Timeout,

    /// Connection string or stored credential is unusable
    #[error("Invalid wallet credential: {0}")]
    InvalidCredential(String),

    /// Anything else
    #[error("Wallet error: {0}")]
    Unknown(String),
}

impl WalletError {
    /// Whether another attempt inside the retry budget makes sense
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::Timeout | WalletError::Unknown(_))
    }
}

/// Remote wallet operations used by payout settlement
#[async_trait]
pub trait WalletService: Send + Sync {
    /// Create an invoice on this wallet for the given amount
    async fn make_invoice(&self, amount_sats: u64, memo: &str) -> Result<String, WalletError>;

    /// Pay an invoice from this wallet, returning the payment preimage
    async fn pay_invoice(&self, invoice: &str) -> Result<String, WalletError>;
}

/// Parsed wallet connection credential
///
/// Connection strings look like
/// `walletconnect://wallet.example.com/rpc?secret=<hex>`; the secret
/// authenticates the caller to the wallet service. Plain `http(s)`
/// schemes are accepted as-is for local deployments.
#[derive(Debug, Clone)]
pub struct WalletConnection {
    pub endpoint: String,
    pub secret: String,
}

impl WalletConnection {
    pub fn parse(connection: &str) -> Result<Self, WalletError> {
        let url = reqwest::Url::parse(connection)
            .map_err(|e| WalletError::InvalidCredential(format!("bad connection string: {}", e)))?;

        let secret = url
            .query_pairs()
            .find(|(k, _)| k == "secret")
            .map(|(_, v)| v.to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                WalletError::InvalidCredential("connection string has no secret".to_string())
            })?;

        let host = url
            .host_str()
            .ok_or_else(|| WalletError::InvalidCredential("connection string has no host".to_string()))?;
        let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();

        let endpoint = match url.scheme() {
            "walletconnect" => format!("https://{}{}{}", host, port, url.path()),
            "http" | "https" => format!("{}://{}{}{}", url.scheme(), host, port, url.path()),
            other => {
                return Err(WalletError::InvalidCredential(format!(
                    "unsupported connection scheme: {}",
                    other
                )))
            }
        };

        Ok(Self { endpoint, secret })
    }
}

#[derive(Debug, Deserialize)]
struct WalletResponse {
    #[serde(default)]
    error: Option<WalletResponseError>,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WalletResponseError {
    code: String,
    #[serde(default)]
    message: String,
}

/// HTTP implementation of the wallet protocol
pub struct HttpWalletClient {
    http: reqwest::Client,
    connection: WalletConnection,
    retry_attempts: u32,
    backoff_ms: u64,
}

impl HttpWalletClient {
    pub fn new(connection: &str, cfg: &WalletConfig) -> Result<Self, WalletError> {
        let connection = WalletConnection::parse(connection)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| WalletError::Unknown(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            connection,
            retry_attempts: cfg.retry_attempts,
            backoff_ms: cfg.backoff_ms,
        })
    }

    /// One protocol round trip, classified
    async fn attempt(&self, method: &str, params: &Value) -> Result<Value, WalletError> {
        let body = json!({ "method": method, "params": params });

        let response = self
            .http
            .post(&self.connection.endpoint)
            .bearer_auth(&self.connection.secret)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WalletError::Timeout
                } else {
                    WalletError::Unknown(format!("wallet request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(WalletError::InvalidCredential(format!(
                "wallet rejected credential ({})",
                status
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WalletError::Unknown(format!(
                "wallet returned {}: {}",
                status, text
            )));
        }

        let parsed: WalletResponse = response
            .json()
            .await
            .map_err(|e| WalletError::Unknown(format!("unparseable wallet response: {}", e)))?;

        if let Some(err) = parsed.error {
            return Err(classify_protocol_error(&err.code, &err.message));
        }

        parsed
            .result
            .ok_or_else(|| WalletError::Unknown("wallet response carried no result".to_string()))
    }

    /// One protocol call under the configured retry budget
    async fn call(&self, method: &str, params: Value) -> Result<Value, WalletError> {
        retry_with_backoff(method, self.retry_attempts, self.backoff_ms, || {
            self.attempt(method, &params)
        })
        .await
    }
}

/// Bounded retry with exponential backoff
///
/// Terminal classifications abort immediately; only transient failures
/// (`Timeout`, `Unknown`) consume the attempt budget. Backoff doubles per
/// attempt, capped at 10 seconds.
pub async fn retry_with_backoff<F, Fut, T>(
    label: &str,
    attempts: u32,
    initial_backoff_ms: u64,
    mut operation: F,
) -> Result<T, WalletError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, WalletError>>,
{
    let mut backoff_ms = initial_backoff_ms;

    for attempt in 1..=attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(label, attempt, "wallet call succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(
                    label,
                    attempt,
                    backoff_ms,
                    error = %err,
                    "wallet call failed, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
            Err(err) => return Err(err),
        }
    }

    // attempts is validated nonzero; the loop always returns
    Err(WalletError::Unknown("wallet retry loop exhausted".to_string()))
}

#[async_trait]
impl WalletService for HttpWalletClient {
    async fn make_invoice(&self, amount_sats: u64, memo: &str) -> Result<String, WalletError> {
        let result = self
            .call(
                "make_invoice",
                json!({ "amount_sats": amount_sats, "memo": memo }),
            )
            .await?;

        result
            .get("invoice")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| WalletError::Unknown("make_invoice result had no invoice".to_string()))
    }

    async fn pay_invoice(&self, invoice: &str) -> Result<String, WalletError> {
        let result = self
            .call("pay_invoice", json!({ "invoice": invoice }))
            .await?;

        result
            .get("preimage")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| WalletError::Unknown("pay_invoice result had no preimage".to_string()))
    }
}

/// Map a protocol error code to a classification
fn classify_protocol_error(code: &str, message: &str) -> WalletError {
    match code {
        "QUOTA_EXCEEDED" | "RATE_LIMITED" => WalletError::QuotaExceeded(message.to_string()),
        "INSUFFICIENT_BALANCE" => WalletError::InsufficientBalance(message.to_string()),
        "UNAUTHORIZED" | "RESTRICTED" => WalletError::InvalidCredential(message.to_string()),
        other => WalletError::Unknown(format!("{}: {}", other, message)),
    }
}
