use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Path};
use crate::models::PaymentSessionStatus;
use crate::orchestrator::{self, InitiatePayment, InitiatedPayment};

pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePayment>,
) -> Result<Json<InitiatedPayment>> {
    let initiated = orchestrator::initiate_payment(&state, request, queries::now()).await?;
    Ok(Json(initiated))
}

pub async fn resume_payment(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<InitiatedPayment>> {
    let resumed = orchestrator::resume_payment(&state, &session_id, queries::now()).await?;
    Ok(Json(resumed))
}

/// Polled by clients after returning from the gateway, so a delayed webhook
/// shows up as `pending` rather than an error.
pub async fn get_payment_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<PaymentSessionStatus>> {
    let conn = state.db.get()?;
    let status = orchestrator::poll_status(&conn, &session_id, queries::now())?;
    Ok(Json(status))
}
