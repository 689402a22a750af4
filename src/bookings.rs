//! Booking store operations that span more than one table.
//!
//! Single-row reads and conditional transitions live in `db::queries`; this
//! module composes them into the atomic units the orchestrator relies on.

use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::id::EntityType;
use crate::models::{
    Booking, BookingSpec, BookingStatus, CancelActor, CancelledBooking, PaymentSession, total_cents,
};
use crate::policy::compute_credit_fraction;

/// Turn a completed session's specs into confirmed bookings.
///
/// Must be called inside the caller's write transaction, after the session has
/// been claimed. Any error leaves partial writes behind, so the caller must roll
/// back rather than commit on `Err`.
///
/// For a reschedule the predecessor moves confirmed -> rescheduled and its full
/// value is granted as credit before the session's planned credit is drawn, so
/// the carried value flows through the ledger like any other credit.
pub fn create_bookings_from_session(
    conn: &Connection,
    session: &PaymentSession,
    now: i64,
) -> Result<Vec<Booking>> {
    if session.bookings.is_empty() {
        return Err(AppError::BadRequest(msg::EMPTY_BOOKING_SPECS.into()));
    }

    if let Some(predecessor_id) = &session.reschedule_of_booking_id {
        if session.bookings.len() != 1 {
            return Err(AppError::BadRequest(msg::RESCHEDULE_SINGLE_SPEC.into()));
        }
        let predecessor = queries::get_booking(conn, predecessor_id)?
            .or_not_found(msg::BOOKING_NOT_FOUND)?;
        if !queries::try_mark_booking_rescheduled(conn, predecessor_id, &session.student_id)? {
            return Err(AppError::Conflict(msg::RESCHEDULE_TARGET_UNAVAILABLE.into()));
        }
        let carried = predecessor.value_cents();
        if carried > 0 {
            queries::grant_credit(conn, &session.student_id, predecessor_id, carried, now)?;
        }
        tracing::info!(
            "Booking {} rescheduled by session {}, carried {} cents",
            predecessor_id,
            session.id,
            carried
        );
    }

    let applied = queries::consume_credit(conn, &session.student_id, session.credit_applied_cents)?;
    if applied != session.credit_applied_cents {
        tracing::warn!(
            "Credit shortfall for session {}: planned {}, available {}",
            session.id,
            session.credit_applied_cents,
            applied
        );
        return Err(AppError::Conflict(msg::CREDIT_SHORTFALL.into()));
    }

    let shares = allocate_credit(&session.bookings, session.credit_applied_cents);
    let mut bookings = Vec::with_capacity(session.bookings.len());
    for (spec, credit) in session.bookings.iter().zip(shares) {
        let booking = Booking {
            id: EntityType::Booking.gen_id(),
            student_id: session.student_id.clone(),
            instructor_id: session.instructor_id.clone(),
            lesson_datetime: spec.lesson_datetime,
            duration_minutes: spec.duration_minutes,
            pickup_location: spec.pickup_location.clone(),
            status: BookingStatus::Confirmed,
            amount_charged_cents: spec.gross_cents() - credit,
            credit_applied_cents: credit,
            payment_session_id: session.id.clone(),
            predecessor_booking_id: session.reschedule_of_booking_id.clone(),
            created_at: now,
            cancelled_at: None,
            cancelled_by: None,
            cancel_reason: None,
            credit_granted_cents: None,
        };
        queries::insert_booking(conn, &booking)?;
        bookings.push(booking);
    }

    Ok(bookings)
}

/// Split `credit_cents` across specs in proportion to their gross value.
///
/// Shares are floored, then the leftover cents go to the largest remainders
/// (earliest spec wins ties), so the shares sum exactly to `credit_cents` and
/// no share exceeds its spec's gross value. `credit_cents` must not exceed the
/// specs' total.
pub fn allocate_credit(specs: &[BookingSpec], credit_cents: i64) -> Vec<i64> {
    let total = total_cents(specs).unwrap_or(0);
    if credit_cents <= 0 || total <= 0 {
        return vec![0; specs.len()];
    }

    let mut shares = Vec::with_capacity(specs.len());
    let mut remainders = Vec::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        let scaled = i128::from(credit_cents) * i128::from(spec.gross_cents());
        let share = scaled / i128::from(total);
        shares.push(share as i64);
        remainders.push((scaled % i128::from(total), i));
    }

    let mut leftover = credit_cents - shares.iter().sum::<i64>();
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, i) in remainders {
        if leftover == 0 {
            break;
        }
        shares[i] += 1;
        leftover -= 1;
    }

    shares
}

/// Cancel a confirmed booking and grant the policy's credit, atomically.
///
/// The credit base is the booking's full value (charged plus credit applied).
/// The status change is conditional, so of two racing cancellations only one
/// grants credit; the other gets a conflict.
pub fn cancel_booking(
    conn: &mut Connection,
    booking_id: &str,
    actor: CancelActor,
    reason: Option<&str>,
    now: i64,
) -> Result<(CancelledBooking, Booking)> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let booking = queries::get_booking(&tx, booking_id)?.or_not_found(msg::BOOKING_NOT_FOUND)?;
    if booking.status != BookingStatus::Confirmed {
        return Err(AppError::Conflict(msg::BOOKING_NOT_CONFIRMED.into()));
    }

    let fraction = compute_credit_fraction(booking.lesson_datetime, now, actor);
    let credit = fraction.apply(booking.value_cents());

    if !queries::try_cancel_booking(&tx, booking_id, actor, reason, credit, now)? {
        return Err(AppError::Conflict(msg::BOOKING_NOT_CONFIRMED.into()));
    }
    if credit > 0 {
        queries::grant_credit(&tx, &booking.student_id, booking_id, credit, now)?;
    }

    let cancelled = queries::get_booking(&tx, booking_id)?.or_not_found(msg::BOOKING_NOT_FOUND)?;
    tx.commit()?;

    tracing::info!(
        "Booking cancelled: booking={}, actor={}, fraction_bps={}, credit={}",
        booking_id,
        actor.as_ref(),
        fraction.basis_points(),
        credit
    );

    Ok((
        CancelledBooking {
            booking_id: booking_id.to_string(),
            status: BookingStatus::Cancelled,
            credit_granted: credit,
        },
        cancelled,
    ))
}

/// Mark a confirmed booking as taken place.
pub fn complete_booking(conn: &Connection, booking_id: &str) -> Result<Booking> {
    let booking = queries::get_booking(conn, booking_id)?.or_not_found(msg::BOOKING_NOT_FOUND)?;
    if !queries::try_complete_booking(conn, booking_id)? {
        return Err(AppError::Conflict(format!(
            "{} (status is {})",
            msg::BOOKING_NOT_COMPLETABLE,
            booking.status.as_ref()
        )));
    }
    queries::get_booking(conn, booking_id)?.or_not_found(msg::BOOKING_NOT_FOUND)
}
