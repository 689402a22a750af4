//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql, types::Type};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors
/// instead of panicking on unexpected values.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), Type::Text)
    })
}

fn parse_optional_enum<T: std::str::FromStr>(
    row: &Row,
    col: usize,
    col_name: &str,
) -> rusqlite::Result<Option<T>> {
    row.get::<_, Option<String>>(col)?
        .map(|s| {
            s.parse::<T>().map_err(|_| {
                rusqlite::Error::InvalidColumnType(col, col_name.to_string(), Type::Text)
            })
        })
        .transpose()
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const PAYMENT_SESSION_COLS: &str = "id, student_id, instructor_id, gateway, external_reference, amount_total_cents, credit_applied_cents, amount_due_cents, currency, status, bookings_payload, reschedule_of_booking_id, failure_reason, created_at, expires_at, completed_at";

pub const BOOKING_COLS: &str = "id, student_id, instructor_id, lesson_datetime, duration_minutes, pickup_location, status, amount_charged_cents, credit_applied_cents, payment_session_id, predecessor_booking_id, created_at, cancelled_at, cancelled_by, cancel_reason, credit_granted_cents";

pub const CREDIT_ENTRY_COLS: &str =
    "id, student_id, source_booking_id, amount_cents, remaining_cents, created_at";

pub const RECONCILIATION_COLS: &str =
    "id, payment_session_id, external_reference, reason, details, created_at, resolved_at";

// ============ FromRow Implementations ============

impl FromRow for PaymentSession {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let payload: String = row.get(10)?;
        let bookings: Vec<BookingSpec> = serde_json::from_str(&payload)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;
        Ok(PaymentSession {
            id: row.get(0)?,
            student_id: row.get(1)?,
            instructor_id: row.get(2)?,
            gateway: parse_enum(row, 3, "gateway")?,
            external_reference: row.get(4)?,
            amount_total_cents: row.get(5)?,
            credit_applied_cents: row.get(6)?,
            amount_due_cents: row.get(7)?,
            currency: row.get(8)?,
            status: parse_enum(row, 9, "status")?,
            bookings,
            reschedule_of_booking_id: row.get(11)?,
            failure_reason: row.get(12)?,
            created_at: row.get(13)?,
            expires_at: row.get(14)?,
            completed_at: row.get(15)?,
        })
    }
}

impl FromRow for Booking {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Booking {
            id: row.get(0)?,
            student_id: row.get(1)?,
            instructor_id: row.get(2)?,
            lesson_datetime: row.get(3)?,
            duration_minutes: row.get(4)?,
            pickup_location: row.get(5)?,
            status: parse_enum(row, 6, "status")?,
            amount_charged_cents: row.get(7)?,
            credit_applied_cents: row.get(8)?,
            payment_session_id: row.get(9)?,
            predecessor_booking_id: row.get(10)?,
            created_at: row.get(11)?,
            cancelled_at: row.get(12)?,
            cancelled_by: parse_optional_enum(row, 13, "cancelled_by")?,
            cancel_reason: row.get(14)?,
            credit_granted_cents: row.get(15)?,
        })
    }
}

impl FromRow for CreditEntry {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CreditEntry {
            id: row.get(0)?,
            student_id: row.get(1)?,
            source_booking_id: row.get(2)?,
            amount_cents: row.get(3)?,
            remaining_cents: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for ReconciliationItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ReconciliationItem {
            id: row.get(0)?,
            payment_session_id: row.get(1)?,
            external_reference: row.get(2)?,
            reason: parse_enum(row, 3, "reason")?,
            details: row.get(4)?,
            created_at: row.get(5)?,
            resolved_at: row.get(6)?,
        })
    }
}
