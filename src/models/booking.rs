use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Completed,
    Cancelled,
    Rescheduled,
}

/// Who asked for a cancellation. Admin cancellations always refund in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CancelActor {
    Student,
    Instructor,
    Admin,
}

/// A paid lesson. Rows are never deleted; cancelled and rescheduled
/// bookings stay for history and credit provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub student_id: String,
    pub instructor_id: String,
    pub lesson_datetime: i64,
    pub duration_minutes: i64,
    pub pickup_location: String,
    pub status: BookingStatus,
    pub amount_charged_cents: i64,
    pub credit_applied_cents: i64,
    pub payment_session_id: String,
    pub predecessor_booking_id: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<CancelActor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_granted_cents: Option<i64>,
}

impl Booking {
    /// Full value of the lesson, however it was paid for.
    pub fn value_cents(&self) -> i64 {
        self.amount_charged_cents + self.credit_applied_cents
    }
}

/// Result of a cancellation.
#[derive(Debug, Clone, Serialize)]
pub struct CancelledBooking {
    pub booking_id: String,
    pub status: BookingStatus,
    pub credit_granted: i64,
}

#[derive(Debug, Deserialize)]
pub struct CancelBooking {
    pub actor: CancelActor,
    #[serde(default)]
    pub reason: Option<String>,
}
