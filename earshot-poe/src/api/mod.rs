//! HTTP API: routing, handlers, and error mapping

pub mod handlers;
pub mod server;

pub use server::{create_router, run};

use crate::engagement::RejectReason;
use crate::error::Error;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Wire shape for error responses
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub reason: &'static str,
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            // Burst violations are transient; the client retries on its
            // next natural heartbeat tick.
            Error::Heartbeat(RejectReason::TooSoon { .. }) | Error::RateLimited => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Error::Heartbeat(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Error::SessionOwnerMismatch(_) => StatusCode::FORBIDDEN,
            Error::SessionAlreadyCompleted(_)
            | Error::NotEligible(_)
            | Error::WalletNotConnected(_)
            | Error::AlreadyPaid(_) => StatusCode::CONFLICT,
            Error::Wallet(_) => StatusCode::BAD_GATEWAY,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Database(_) | Error::Common(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorBody {
            success: false,
            reason: self.reason_code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
