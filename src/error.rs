use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// User-facing error messages shared across handlers and the orchestrator.
pub mod msg {
    pub const SESSION_NOT_FOUND: &str = "Payment session not found";
    pub const BOOKING_NOT_FOUND: &str = "Booking not found";
    pub const EMPTY_BOOKING_SPECS: &str = "At least one booking spec is required";
    pub const NON_POSITIVE_AMOUNT: &str = "Total amount must be greater than zero";
    pub const FEE_TOO_LARGE: &str = "Fee exceeds the maximum allowed per lesson";
    pub const TOTAL_TOO_LARGE: &str = "Total amount is too large";
    pub const RESCHEDULE_SINGLE_SPEC: &str = "A reschedule must contain exactly one booking spec";
    pub const RESCHEDULE_TARGET_INVALID: &str =
        "Booking to reschedule must be a confirmed booking of this student";
    pub const BOOKING_NOT_CONFIRMED: &str = "Only confirmed bookings can be cancelled";
    pub const SESSION_NOT_PENDING: &str = "Payment session is no longer pending";
    pub const CHECKOUT_ALREADY_OPEN: &str =
        "A checkout is already open for this payment session";
    pub const CREDIT_SHORTFALL: &str = "Planned credit is no longer available";
    pub const RESCHEDULE_TARGET_UNAVAILABLE: &str =
        "Booking being rescheduled is no longer confirmed";
    pub const BOOKING_NOT_COMPLETABLE: &str = "Only confirmed bookings can be completed";
    pub const RECONCILIATION_NOT_FOUND: &str = "Open reconciliation item not found";
    pub const SESSION_EXPIRED: &str = "Payment session expired before completion";
    pub const STRIPE_NOT_CONFIGURED: &str = "Stripe gateway is not configured";
    pub const MOCK_GATEWAY_DISABLED: &str = "Mock gateway is only available in dev mode";
    pub const INVALID_GATEWAY: &str = "Invalid gateway. Must be 'stripe' or 'mock'";
    pub const INVALID_SIGNATURE_FORMAT: &str = "Invalid signature format";
    pub const INVALID_TIMESTAMP_IN_SIGNATURE: &str = "Invalid timestamp in signature";
    pub const INVALID_WEBHOOK_SECRET: &str = "Invalid webhook secret";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone())),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg.clone())),
            AppError::SessionExpired(msg) => (StatusCode::GONE, "Session expired", Some(msg.clone())),
            AppError::Gateway(msg) => {
                tracing::warn!("Gateway error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "Payment gateway unavailable",
                    Some("The payment session is still pending; retry shortly".to_string()),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Converts `Option<T>` lookups into `AppError::NotFound`.
pub trait OptionExt<T> {
    fn or_not_found(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, message: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(message.to_string()))
    }
}
