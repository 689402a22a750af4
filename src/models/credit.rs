use serde::{Deserialize, Serialize};

/// One grant of non-cash credit, drawn down oldest-first.
///
/// `remaining_cents` starts at `amount_cents` and only ever decreases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditEntry {
    pub id: String,
    pub student_id: String,
    /// Booking whose cancellation (or reschedule) produced this credit
    pub source_booking_id: String,
    pub amount_cents: i64,
    pub remaining_cents: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditSummary {
    pub student_id: String,
    pub total_available_credit: i64,
    pub credits: Vec<CreditEntry>,
}
