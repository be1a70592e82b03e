use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::entitlements::LedgerError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("too many requests")]
    RateLimited,
    #[error("{0}")]
    Message(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(?self);
        match self {
            AppError::Ledger(err) => ledger_response(err),
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()).into_response(),
            AppError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
            }
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()).into_response(),
            AppError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            AppError::RateLimited => {
                (StatusCode::TOO_MANY_REQUESTS, self.to_string()).into_response()
            }
            AppError::Db(_) | AppError::Message(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
            }
        }
    }
}

/// Ledger failures carry their remainders into the body so callers can present
/// upgrade or purchase options instead of a generic denial.
fn ledger_response(err: LedgerError) -> Response {
    match err {
        LedgerError::InsufficientBalance {
            subscription_remaining,
            purchased,
        } => (
            StatusCode::PAYMENT_REQUIRED,
            Json(json!({
                "error": "insufficient_balance",
                "subscription_remaining": subscription_remaining,
                "purchased": purchased,
            })),
        )
            .into_response(),
        LedgerError::PolicyDenied(reason) => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "policy_denied",
                "reason": reason,
            })),
        )
            .into_response(),
        LedgerError::NotFound => (StatusCode::NOT_FOUND, "not found").into_response(),
        LedgerError::SettlementConflict { .. } => {
            (StatusCode::CONFLICT, err.to_string()).into_response()
        }
        LedgerError::InvalidAmount(_) => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        LedgerError::Db(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "database error").into_response()
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
