use axum::extract::State;
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Query};
use crate::models::CreditSummary;

#[derive(Debug, Deserialize)]
pub struct CreditQuery {
    pub student_id: String,
}

pub async fn get_available_credit(
    State(state): State<AppState>,
    Query(query): Query<CreditQuery>,
) -> Result<Json<CreditSummary>> {
    if query.student_id.trim().is_empty() {
        return Err(AppError::BadRequest("student_id is required".into()));
    }
    let conn = state.db.get()?;
    let credits = queries::list_available_credits(&conn, &query.student_id)?;
    let total_available_credit = credits.iter().map(|c| c.remaining_cents).sum();

    Ok(Json(CreditSummary {
        student_id: query.student_id,
        total_available_credit,
        credits,
    }))
}
