use axum::extract::State;
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path, Query};
use crate::models::ReconciliationItem;

#[derive(Debug, Deserialize)]
pub struct ReconciliationQuery {
    pub payment_session_id: Option<String>,
}

/// Payments waiting on a human: late completions and rolled-back bookings.
/// Filtering by session also returns items already resolved.
pub async fn list_reconciliation(
    State(state): State<AppState>,
    Query(query): Query<ReconciliationQuery>,
) -> Result<Json<Vec<ReconciliationItem>>> {
    let conn = state.db.get()?;
    let items = match query.payment_session_id.as_deref() {
        Some(session_id) => queries::list_reconciliation_items_for_session(&conn, session_id)?,
        None => queries::list_open_reconciliation_items(&conn)?,
    };
    Ok(Json(items))
}

pub async fn resolve_reconciliation(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    if !queries::resolve_reconciliation_item(&conn, &item_id, queries::now())? {
        return Err(AppError::NotFound(msg::RECONCILIATION_NOT_FOUND.into()));
    }
    tracing::info!("Reconciliation item resolved: item={}", item_id);
    Ok(Json(serde_json::json!({ "id": item_id, "resolved": true })))
}
