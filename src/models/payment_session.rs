use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::error::{AppError, Result, msg};

/// Lifecycle of one checkout attempt.
///
/// Only `Pending` may transition, and only into one of the three terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

/// Which gateway drives a payment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GatewayKind {
    Stripe,
    /// Development-only gateway; never moves real money.
    Mock,
}

/// Result reported by a gateway for a checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayOutcome {
    Success,
    Failure,
}

/// Client-submitted description of one intended lesson, before payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSpec {
    /// Lesson start (Unix timestamp)
    pub lesson_datetime: i64,
    pub duration_minutes: i64,
    pub pickup_location: String,
    /// Instructor's fee for the lesson, derived from the hourly rate
    pub lesson_fee_cents: i64,
    /// Platform booking fee for the lesson
    #[serde(default)]
    pub booking_fee_cents: i64,
}

/// Upper bound on either fee of a single lesson (R1,000,000.00).
pub const MAX_FEE_CENTS: i64 = 100_000_000;

impl BookingSpec {
    /// Lesson fee plus booking fee. Saturates rather than wrapping; validated
    /// specs are far below the limit.
    pub fn gross_cents(&self) -> i64 {
        self.lesson_fee_cents.saturating_add(self.booking_fee_cents)
    }

    fn validate(&self) -> Result<()> {
        if self.duration_minutes <= 0 {
            return Err(AppError::BadRequest(
                "duration_minutes must be greater than zero".into(),
            ));
        }
        if self.pickup_location.trim().is_empty() {
            return Err(AppError::BadRequest("pickup_location is required".into()));
        }
        if self.lesson_fee_cents < 0 || self.booking_fee_cents < 0 {
            return Err(AppError::BadRequest("Fees cannot be negative".into()));
        }
        if self.lesson_fee_cents > MAX_FEE_CENTS || self.booking_fee_cents > MAX_FEE_CENTS {
            return Err(AppError::BadRequest(msg::FEE_TOO_LARGE.into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub id: String,
    pub student_id: String,
    pub instructor_id: String,
    pub gateway: GatewayKind,
    /// Gateway's identifier for the checkout (set once the gateway has been called)
    pub external_reference: Option<String>,
    /// Gross value of all lessons in the session
    pub amount_total_cents: i64,
    /// Credit planned at initiate time and drawn from the ledger on completion
    pub credit_applied_cents: i64,
    /// Amount charged through the gateway
    pub amount_due_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub bookings: Vec<BookingSpec>,
    pub reschedule_of_booking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub completed_at: Option<i64>,
}

impl PaymentSession {
    /// Status as observed at `now`, without writing anything.
    ///
    /// A pending session past its TTL reads as expired even before the
    /// conditional transition has been persisted.
    pub fn effective_status(&self, now: i64) -> PaymentStatus {
        if self.status == PaymentStatus::Pending && now >= self.expires_at {
            PaymentStatus::Expired
        } else {
            self.status
        }
    }
}

/// Outcome of a conditional status transition on a payment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    /// This call moved the session out of `pending`.
    Applied,
    /// The session was already terminal; nothing was written.
    Unchanged(PaymentStatus),
}

#[derive(Debug, Clone)]
pub struct CreatePaymentSession {
    pub student_id: String,
    pub instructor_id: String,
    pub gateway: GatewayKind,
    pub bookings: Vec<BookingSpec>,
    pub reschedule_of_booking_id: Option<String>,
    pub credit_applied_cents: i64,
    pub currency: String,
    pub ttl_secs: i64,
}

impl CreatePaymentSession {
    /// Validates the checkout input, returning the gross total in cents.
    pub fn validate(&self) -> Result<i64> {
        if self.student_id.trim().is_empty() || self.instructor_id.trim().is_empty() {
            return Err(AppError::BadRequest(
                "student_id and instructor_id are required".into(),
            ));
        }
        if self.bookings.is_empty() {
            return Err(AppError::BadRequest(msg::EMPTY_BOOKING_SPECS.into()));
        }
        for spec in &self.bookings {
            spec.validate()?;
        }

        let total = total_cents(&self.bookings)
            .ok_or_else(|| AppError::BadRequest(msg::TOTAL_TOO_LARGE.into()))?;
        if total <= 0 {
            return Err(AppError::BadRequest(msg::NON_POSITIVE_AMOUNT.into()));
        }
        if self.credit_applied_cents < 0 || self.credit_applied_cents > total {
            return Err(AppError::Internal(format!(
                "planned credit {} outside [0, {}]",
                self.credit_applied_cents, total
            )));
        }
        Ok(total)
    }
}

/// Sum of the gross value of every spec, `None` on overflow.
pub fn total_cents(specs: &[BookingSpec]) -> Option<i64> {
    specs.iter().try_fold(0i64, |total, spec| {
        spec.lesson_fee_cents
            .checked_add(spec.booking_fee_cents)
            .and_then(|gross| total.checked_add(gross))
    })
}

/// What a client sees when polling a session.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSessionStatus {
    pub payment_session_id: String,
    pub status: PaymentStatus,
    pub amount_total_cents: i64,
    pub amount_due_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookings_data: Option<Vec<super::Booking>>,
}
