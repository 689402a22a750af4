use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{AppError, Result};
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    BOOKING_COLS, CREDIT_ENTRY_COLS, PAYMENT_SESSION_COLS, RECONCILIATION_COLS, query_all,
    query_one,
};

/// Current Unix timestamp in seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============ Payment Sessions ============

/// Validate and persist a new `pending` payment session.
///
/// `expires_at` is `now + ttl_secs`; the gateway reference is attached later by
/// [`set_payment_session_reference`] once the gateway has been called.
pub fn create_payment_session(
    conn: &Connection,
    input: &CreatePaymentSession,
    now: i64,
) -> Result<PaymentSession> {
    let amount_total_cents = input.validate()?;
    let amount_due_cents = amount_total_cents - input.credit_applied_cents;
    let id = EntityType::PaymentSession.gen_id();
    let expires_at = now + input.ttl_secs;
    let payload = serde_json::to_string(&input.bookings)?;

    conn.execute(
        "INSERT INTO payment_sessions (id, student_id, instructor_id, gateway, amount_total_cents,
            credit_applied_cents, amount_due_cents, currency, status, bookings_payload,
            reschedule_of_booking_id, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, ?10, ?11, ?12)",
        params![
            &id,
            &input.student_id,
            &input.instructor_id,
            input.gateway.as_ref(),
            amount_total_cents,
            input.credit_applied_cents,
            amount_due_cents,
            &input.currency,
            &payload,
            &input.reschedule_of_booking_id,
            now,
            expires_at,
        ],
    )?;

    Ok(PaymentSession {
        id,
        student_id: input.student_id.clone(),
        instructor_id: input.instructor_id.clone(),
        gateway: input.gateway,
        external_reference: None,
        amount_total_cents,
        credit_applied_cents: input.credit_applied_cents,
        amount_due_cents,
        currency: input.currency.clone(),
        status: PaymentStatus::Pending,
        bookings: input.bookings.clone(),
        reschedule_of_booking_id: input.reschedule_of_booking_id.clone(),
        failure_reason: None,
        created_at: now,
        expires_at,
        completed_at: None,
    })
}

pub fn get_payment_session(conn: &Connection, id: &str) -> Result<Option<PaymentSession>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payment_sessions WHERE id = ?1", PAYMENT_SESSION_COLS),
        &[&id],
    )
}

pub fn get_payment_session_by_reference(
    conn: &Connection,
    external_reference: &str,
) -> Result<Option<PaymentSession>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_sessions WHERE external_reference = ?1",
            PAYMENT_SESSION_COLS
        ),
        &[&external_reference],
    )
}

/// Read a session, first applying the lazy pending -> expired transition if its TTL has passed.
pub fn get_payment_session_fresh(
    conn: &Connection,
    id: &str,
    now: i64,
) -> Result<Option<PaymentSession>> {
    expire_payment_session_if_stale(conn, id, now)?;
    get_payment_session(conn, id)
}

/// Attach the gateway's checkout reference. Only pending sessions accept a reference.
pub fn set_payment_session_reference(
    conn: &Connection,
    id: &str,
    external_reference: &str,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payment_sessions SET external_reference = ?1 WHERE id = ?2 AND status = 'pending'",
        params![external_reference, id],
    )?;
    Ok(affected > 0)
}

/// Conditional pending -> expired transition for a single session past its TTL.
pub fn expire_payment_session_if_stale(conn: &Connection, id: &str, now: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payment_sessions SET status = 'expired'
         WHERE id = ?1 AND status = 'pending' AND expires_at <= ?2",
        params![id, now],
    )?;
    if affected > 0 {
        tracing::info!("Payment session expired: session={}", id);
    }
    Ok(affected > 0)
}

/// Expire every pending session past its TTL. Returns the number of sessions expired.
pub fn expire_stale_payment_sessions(conn: &Connection, now: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE payment_sessions SET status = 'expired' WHERE status = 'pending' AND expires_at <= ?1",
        params![now],
    )?;
    Ok(affected)
}

/// Atomically move a session from pending to completed.
///
/// Compare-and-swap on `status`: of any number of concurrent callers exactly one
/// gets `Applied`; the rest observe the terminal state and write nothing. A stale
/// session is expired first, so completion after the TTL reports `Unchanged(Expired)`.
pub fn mark_payment_session_completed(
    conn: &Connection,
    id: &str,
    now: i64,
) -> Result<SessionTransition> {
    expire_payment_session_if_stale(conn, id, now)?;
    let affected = conn.execute(
        "UPDATE payment_sessions SET status = 'completed', completed_at = ?1
         WHERE id = ?2 AND status = 'pending' AND expires_at > ?1",
        params![now, id],
    )?;
    current_transition(conn, id, affected)
}

/// Atomically move a session from pending to failed, recording why.
pub fn mark_payment_session_failed(
    conn: &Connection,
    id: &str,
    reason: &str,
) -> Result<SessionTransition> {
    let affected = conn.execute(
        "UPDATE payment_sessions SET status = 'failed', failure_reason = ?1
         WHERE id = ?2 AND status = 'pending'",
        params![reason, id],
    )?;
    current_transition(conn, id, affected)
}

fn current_transition(conn: &Connection, id: &str, affected: usize) -> Result<SessionTransition> {
    if affected > 0 {
        return Ok(SessionTransition::Applied);
    }
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM payment_sessions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let status = status
        .ok_or_else(|| AppError::NotFound(format!("Payment session {} not found", id)))?
        .parse::<PaymentStatus>()
        .map_err(|_| AppError::Internal(format!("Invalid status on payment session {}", id)))?;
    Ok(SessionTransition::Unchanged(status))
}

// ============ Bookings ============

pub fn insert_booking(conn: &Connection, booking: &Booking) -> Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, student_id, instructor_id, lesson_datetime, duration_minutes,
            pickup_location, status, amount_charged_cents, credit_applied_cents,
            payment_session_id, predecessor_booking_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            &booking.id,
            &booking.student_id,
            &booking.instructor_id,
            booking.lesson_datetime,
            booking.duration_minutes,
            &booking.pickup_location,
            booking.status.as_ref(),
            booking.amount_charged_cents,
            booking.credit_applied_cents,
            &booking.payment_session_id,
            &booking.predecessor_booking_id,
            booking.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_booking(conn: &Connection, id: &str) -> Result<Option<Booking>> {
    query_one(
        conn,
        &format!("SELECT {} FROM bookings WHERE id = ?1", BOOKING_COLS),
        &[&id],
    )
}

pub fn list_bookings_for_session(conn: &Connection, session_id: &str) -> Result<Vec<Booking>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM bookings WHERE payment_session_id = ?1 ORDER BY lesson_datetime, rowid",
            BOOKING_COLS
        ),
        &[&session_id],
    )
}

pub fn list_bookings_for_student(conn: &Connection, student_id: &str) -> Result<Vec<Booking>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM bookings WHERE student_id = ?1 ORDER BY lesson_datetime, rowid",
            BOOKING_COLS
        ),
        &[&student_id],
    )
}

/// Conditional confirmed -> rescheduled transition, scoped to the owning student.
pub fn try_mark_booking_rescheduled(conn: &Connection, id: &str, student_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE bookings SET status = 'rescheduled'
         WHERE id = ?1 AND student_id = ?2 AND status = 'confirmed'",
        params![id, student_id],
    )?;
    Ok(affected > 0)
}

/// Conditional confirmed -> cancelled transition. Returns false if the booking
/// was not confirmed (already cancelled, rescheduled or completed).
pub fn try_cancel_booking(
    conn: &Connection,
    id: &str,
    actor: CancelActor,
    reason: Option<&str>,
    credit_granted_cents: i64,
    now: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE bookings SET status = 'cancelled', cancelled_at = ?1, cancelled_by = ?2,
            cancel_reason = ?3, credit_granted_cents = ?4
         WHERE id = ?5 AND status = 'confirmed'",
        params![now, actor.as_ref(), reason, credit_granted_cents, id],
    )?;
    Ok(affected > 0)
}

/// Conditional confirmed -> completed transition once the lesson has taken place.
pub fn try_complete_booking(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE bookings SET status = 'completed' WHERE id = ?1 AND status = 'confirmed'",
        params![id],
    )?;
    Ok(affected > 0)
}

// ============ Credit Ledger ============

/// Grant credit to a student. The new entry starts fully unspent.
pub fn grant_credit(
    conn: &Connection,
    student_id: &str,
    source_booking_id: &str,
    amount_cents: i64,
    now: i64,
) -> Result<CreditEntry> {
    if amount_cents <= 0 {
        return Err(AppError::BadRequest("Credit amount must be positive".into()));
    }
    let id = EntityType::CreditEntry.gen_id();

    conn.execute(
        "INSERT INTO credit_ledger (id, student_id, source_booking_id, amount_cents, remaining_cents, created_at)
         VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
        params![&id, student_id, source_booking_id, amount_cents, now],
    )?;

    Ok(CreditEntry {
        id,
        student_id: student_id.to_string(),
        source_booking_id: source_booking_id.to_string(),
        amount_cents,
        remaining_cents: amount_cents,
        created_at: now,
    })
}

/// Entries with unspent credit, oldest first.
pub fn list_available_credits(conn: &Connection, student_id: &str) -> Result<Vec<CreditEntry>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM credit_ledger WHERE student_id = ?1 AND remaining_cents > 0
             ORDER BY created_at, rowid",
            CREDIT_ENTRY_COLS
        ),
        &[&student_id],
    )
}

pub fn get_available_credit_total(conn: &Connection, student_id: &str) -> Result<i64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(remaining_cents), 0) FROM credit_ledger WHERE student_id = ?1",
        params![student_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

/// Draw up to `amount_needed` from the student's credit, oldest entries first.
///
/// Returns the amount actually applied, which is never more than requested nor more
/// than what is available. Must run inside a write transaction so the read and the
/// decrements are atomic with respect to other spends; each decrement is also
/// conditional on the entry still holding enough credit.
pub fn consume_credit(conn: &Connection, student_id: &str, amount_needed: i64) -> Result<i64> {
    if amount_needed <= 0 {
        return Ok(0);
    }

    let mut applied = 0;
    for entry in list_available_credits(conn, student_id)? {
        let outstanding = amount_needed - applied;
        if outstanding == 0 {
            break;
        }
        let draw = entry.remaining_cents.min(outstanding);
        let affected = conn.execute(
            "UPDATE credit_ledger SET remaining_cents = remaining_cents - ?1
             WHERE id = ?2 AND remaining_cents >= ?1",
            params![draw, &entry.id],
        )?;
        if affected > 0 {
            applied += draw;
        }
    }

    Ok(applied)
}

// ============ Reconciliation ============

/// Queue a payment for manual reconciliation. Returns false if an open item
/// already exists for this session and reason.
pub fn record_reconciliation_item(
    conn: &Connection,
    payment_session_id: &str,
    external_reference: Option<&str>,
    reason: ReconciliationReason,
    details: Option<&str>,
    now: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO reconciliation_items
            (id, payment_session_id, external_reference, reason, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            EntityType::ReconciliationItem.gen_id(),
            payment_session_id,
            external_reference,
            reason.as_ref(),
            details,
            now,
        ],
    )?;
    Ok(affected > 0)
}

pub fn list_open_reconciliation_items(conn: &Connection) -> Result<Vec<ReconciliationItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM reconciliation_items WHERE resolved_at IS NULL ORDER BY created_at, rowid",
            RECONCILIATION_COLS
        ),
        &[],
    )
}

pub fn list_reconciliation_items_for_session(
    conn: &Connection,
    payment_session_id: &str,
) -> Result<Vec<ReconciliationItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM reconciliation_items WHERE payment_session_id = ?1 ORDER BY created_at, rowid",
            RECONCILIATION_COLS
        ),
        &[&payment_session_id],
    )
}

pub fn resolve_reconciliation_item(conn: &Connection, id: &str, now: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE reconciliation_items SET resolved_at = ?1 WHERE id = ?2 AND resolved_at IS NULL",
        params![now, id],
    )?;
    Ok(affected > 0)
}
