//! Gateway-agnostic handling of completion signals.

use axum::http::StatusCode;

use crate::db::{AppState, queries};
use crate::error::AppError;
use crate::models::{GatewayKind, GatewayOutcome};
use crate::orchestrator::{self, CompletionResult};

/// Webhook response: status code plus a short message for the gateway's logs.
pub type WebhookResult = (StatusCode, &'static str);

/// Feed a verified completion signal to the orchestrator and map the result
/// to a webhook response.
///
/// Anything the gateway cannot fix by retrying (duplicates, unknown references,
/// expired sessions, rolled-back bookings) is acknowledged with 200 so it stops
/// retrying; the latter two are already queued for reconciliation. Only
/// infrastructure errors return 500 to trigger a retry.
pub fn complete_payment(
    state: &AppState,
    gateway: GatewayKind,
    external_reference: &str,
    outcome: GatewayOutcome,
) -> WebhookResult {
    let result = orchestrator::on_gateway_completion(
        state,
        gateway,
        external_reference,
        outcome,
        queries::now(),
    );
    let gateway = gateway.as_ref();
    match result {
        Ok(CompletionResult::Completed { .. }) => (StatusCode::OK, "OK"),
        Ok(CompletionResult::Failed { .. }) => (StatusCode::OK, "Payment failure recorded"),
        Ok(CompletionResult::AlreadyProcessed { .. }) => (StatusCode::OK, "Already processed"),
        Err(AppError::NotFound(_)) => {
            tracing::warn!(
                "{} completion for unknown reference {} ignored",
                gateway,
                external_reference
            );
            (StatusCode::OK, "Unknown payment reference")
        }
        Err(AppError::SessionExpired(_)) => {
            (StatusCode::OK, "Session expired, queued for reconciliation")
        }
        Err(AppError::Conflict(message)) => {
            tracing::warn!(
                "{} completion {} could not create bookings: {}",
                gateway,
                external_reference,
                message
            );
            (StatusCode::OK, "Booking creation failed, queued for reconciliation")
        }
        Err(e) => {
            tracing::error!(
                "{} completion {} failed: {}",
                gateway,
                external_reference,
                e
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}
