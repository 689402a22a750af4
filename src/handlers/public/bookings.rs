use axum::extract::State;
use serde::Deserialize;

use crate::bookings;
use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::{Booking, CancelBooking, CancelledBooking};
use crate::orchestrator;

#[derive(Debug, Deserialize)]
pub struct StudentBookingsQuery {
    pub student_id: String,
}

/// Every booking the student holds, in lesson order, whatever its status.
pub async fn list_student_bookings(
    State(state): State<AppState>,
    Query(query): Query<StudentBookingsQuery>,
) -> Result<Json<Vec<Booking>>> {
    if query.student_id.trim().is_empty() {
        return Err(AppError::BadRequest("student_id is required".into()));
    }
    let conn = state.db.get()?;
    Ok(Json(queries::list_bookings_for_student(&conn, &query.student_id)?))
}

pub async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
) -> Result<Json<Booking>> {
    let conn = state.db.get()?;
    let booking = queries::get_booking(&conn, &booking_id)?.or_not_found(msg::BOOKING_NOT_FOUND)?;
    Ok(Json(booking))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
    Json(request): Json<CancelBooking>,
) -> Result<Json<CancelledBooking>> {
    let cancelled = orchestrator::cancel_booking(
        &state,
        &booking_id,
        request.actor,
        request.reason.as_deref(),
        queries::now(),
    )?;
    Ok(Json(cancelled))
}

pub async fn complete_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
) -> Result<Json<Booking>> {
    let conn = state.db.get()?;
    let booking = bookings::complete_booking(&conn, &booking_id)?;
    tracing::info!("Booking completed: booking={}", booking.id);
    Ok(Json(booking))
}
