mod bookings;
mod credits;
mod payments;
mod reconciliation;

pub use bookings::*;
pub use credits::*;
pub use payments::*;
pub use reconciliation::*;

use axum::{Json, Router, routing::{get, post}};
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/payments/initiate", post(initiate_payment))
        .route("/payment-sessions/{id}", get(get_payment_status))
        // Only for sessions whose checkout never opened (gateway outage)
        .route("/payment-sessions/{id}/resume", post(resume_payment))
        .route("/bookings", get(list_student_bookings))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/cancel", post(cancel_booking))
        .route("/bookings/{id}/complete", post(complete_booking))
        .route("/credits/available", get(get_available_credit))
        .route("/reconciliation", get(list_reconciliation))
        .route("/reconciliation/{id}/resolve", post(resolve_reconciliation))
}
