use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Why a gateway payment could not be applied automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReconciliationReason {
    /// Gateway reported success after the session had already expired
    LateCompletion,
    /// Booking creation rolled back after the gateway took payment
    CreationFailed,
}

/// A payment that needs a human to settle it (refund, manual booking, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationItem {
    pub id: String,
    pub payment_session_id: String,
    pub external_reference: Option<String>,
    pub reason: ReconciliationReason,
    pub details: Option<String>,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}
