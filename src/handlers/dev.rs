//! Dev-only routes that drive the mock gateway. Only mounted in dev mode.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path};
use crate::models::{GatewayKind, GatewayOutcome, PaymentStatus};
use crate::payments::MockGateway;

use super::webhooks::common::complete_payment;

#[derive(Debug, Deserialize)]
pub struct MockCompleteRequest {
    pub external_reference: String,
    pub outcome: GatewayOutcome,
}

#[derive(Debug, Serialize)]
pub struct MockCompleteResponse {
    pub acknowledged: bool,
    pub message: &'static str,
}

/// Stand-in for the mock gateway's "pay" button. Responds exactly as the
/// Stripe webhook would for the same completion.
pub async fn complete_mock_payment(
    State(state): State<AppState>,
    Json(request): Json<MockCompleteRequest>,
) -> Result<(StatusCode, Json<MockCompleteResponse>)> {
    state.gateways.mock()?;
    let (status, message) = complete_payment(
        &state,
        GatewayKind::Mock,
        &request.external_reference,
        request.outcome,
    );
    Ok((
        status,
        Json(MockCompleteResponse {
            acknowledged: status.is_success(),
            message,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct MockCheckoutPage {
    pub external_reference: String,
    pub payment_session_id: String,
    pub amount_due_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
}

/// What the student would see on the mock checkout page.
pub async fn get_mock_checkout(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<MockCheckoutPage>> {
    state.gateways.mock()?;
    let conn = state.db.get()?;
    let session = queries::get_payment_session_by_reference(&conn, &reference)?
        .filter(|s| {
            s.gateway == GatewayKind::Mock && reference.starts_with(MockGateway::REFERENCE_PREFIX)
        })
        .or_not_found(msg::SESSION_NOT_FOUND)?;

    Ok(Json(MockCheckoutPage {
        status: session.effective_status(queries::now()),
        external_reference: reference,
        payment_session_id: session.id,
        amount_due_cents: session.amount_due_cents,
        currency: session.currency,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dev/mock-gateway/complete", post(complete_mock_payment))
        .route("/dev/mock-gateway/checkout/{reference}", get(get_mock_checkout))
}
