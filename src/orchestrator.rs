//! Booking-payment orchestration.
//!
//! A checkout moves through three phases:
//!
//! 1. `initiate_payment` persists a pending session with its planned credit and
//!    opens a checkout with the session's gateway (outside any transaction).
//! 2. The gateway reports back via webhook (Stripe) or the dev endpoint (mock);
//!    `process_completion` claims the session and creates every booking in one
//!    IMMEDIATE transaction.
//! 3. Clients poll `poll_status` until the session is terminal.
//!
//! Credit-only checkouts (nothing left to charge) skip the gateway and complete
//! inline through the same completion path.

use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::bookings;
use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::models::{
    Booking, BookingSpec, BookingStatus, CancelActor, CancelledBooking, CreatePaymentSession,
    GatewayKind, GatewayOutcome, PaymentSession, PaymentSessionStatus, PaymentStatus,
    ReconciliationReason, SessionTransition,
};

#[derive(Debug, Clone, Deserialize)]
pub struct InitiatePayment {
    pub student_id: String,
    pub instructor_id: String,
    pub booking_specs: Vec<BookingSpec>,
    pub gateway: GatewayKind,
    /// Booking being moved to a new slot, if this checkout is a reschedule
    #[serde(default)]
    pub reschedule_of: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitiatedPayment {
    pub payment_session_id: String,
    /// Absent when credit covered the whole amount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
    pub status: PaymentStatus,
    pub amount_total_cents: i64,
    pub credit_applied_cents: i64,
    pub amount_due_cents: i64,
}

impl InitiatedPayment {
    fn new(session: &PaymentSession, payment_url: Option<String>) -> Self {
        Self {
            payment_session_id: session.id.clone(),
            payment_url,
            status: session.status,
            amount_total_cents: session.amount_total_cents,
            credit_applied_cents: session.credit_applied_cents,
            amount_due_cents: session.amount_due_cents,
        }
    }
}

/// What a completion signal did.
#[derive(Debug, Clone)]
pub enum CompletionResult {
    /// This call completed the session and created its bookings.
    Completed {
        session: PaymentSession,
        bookings: Vec<Booking>,
    },
    /// This call marked the session failed.
    Failed { session_id: String },
    /// The session was already terminal; nothing changed.
    AlreadyProcessed { status: PaymentStatus },
}

/// Start a checkout for one or more lessons.
///
/// Planned credit is `min(total, available credit + value carried by the
/// booking being rescheduled)`. The gateway is only called when something is
/// left to charge; a gateway failure leaves the session pending so the client
/// can `resume_payment`.
pub async fn initiate_payment(
    state: &AppState,
    input: InitiatePayment,
    now: i64,
) -> Result<InitiatedPayment> {
    state.gateways.ensure_available(input.gateway)?;

    let session = {
        let mut conn = state.db.get()?;
        let session = create_session(&conn, state, input, now)?;

        if session.amount_due_cents == 0 {
            let result = apply_outcome(&mut conn, &session, GatewayOutcome::Success, now)?;
            return match result {
                CompletionResult::Completed { session, bookings } => {
                    tracing::info!(
                        "Payment session {} covered by credit, {} booking(s) confirmed",
                        session.id,
                        bookings.len()
                    );
                    state.notifier.booking_confirmed(&bookings, now);
                    Ok(InitiatedPayment::new(&session, None))
                }
                _ => Err(AppError::Internal(format!(
                    "credit-only session {} did not complete",
                    session.id
                ))),
            };
        }
        session
    };

    open_checkout(state, &session).await
}

fn create_session(
    conn: &Connection,
    state: &AppState,
    input: InitiatePayment,
    now: i64,
) -> Result<PaymentSession> {
    let carried = match &input.reschedule_of {
        Some(booking_id) => {
            if input.booking_specs.len() != 1 {
                return Err(AppError::BadRequest(msg::RESCHEDULE_SINGLE_SPEC.into()));
            }
            let target = queries::get_booking(conn, booking_id)?
                .filter(|b| b.student_id == input.student_id && b.status == BookingStatus::Confirmed)
                .ok_or_else(|| AppError::BadRequest(msg::RESCHEDULE_TARGET_INVALID.into()))?;
            target.value_cents()
        }
        None => 0,
    };

    let mut create = CreatePaymentSession {
        student_id: input.student_id,
        instructor_id: input.instructor_id,
        gateway: input.gateway,
        bookings: input.booking_specs,
        reschedule_of_booking_id: input.reschedule_of,
        credit_applied_cents: 0,
        currency: state.currency.clone(),
        ttl_secs: state.session_ttl_secs,
    };
    let total = create.validate()?;
    let available = queries::get_available_credit_total(conn, &create.student_id)?;
    create.credit_applied_cents = total.min(available.saturating_add(carried));

    let session = queries::create_payment_session(conn, &create, now)?;
    tracing::info!(
        "Payment session created: session={}, student={}, gateway={}, total={}, credit={}, due={}",
        session.id,
        session.student_id,
        session.gateway.as_ref(),
        session.amount_total_cents,
        session.credit_applied_cents,
        session.amount_due_cents
    );
    Ok(session)
}

async fn open_checkout(state: &AppState, session: &PaymentSession) -> Result<InitiatedPayment> {
    let checkout = state.gateways.initiate(session, &state.base_url).await?;

    let conn = state.db.get()?;
    if !queries::set_payment_session_reference(&conn, &session.id, &checkout.external_reference)? {
        tracing::warn!(
            "Payment session {} left pending before checkout {} was attached",
            session.id,
            checkout.external_reference
        );
        return Err(AppError::Conflict(msg::SESSION_NOT_PENDING.into()));
    }
    tracing::info!(
        "Checkout opened: session={}, reference={}",
        session.id,
        checkout.external_reference
    );

    Ok(InitiatedPayment::new(session, Some(checkout.payment_url)))
}

/// Retry the gateway call for a pending session whose checkout never opened.
pub async fn resume_payment(state: &AppState, session_id: &str, now: i64) -> Result<InitiatedPayment> {
    let session = {
        let conn = state.db.get()?;
        queries::get_payment_session_fresh(&conn, session_id, now)?
            .or_not_found(msg::SESSION_NOT_FOUND)?
    };

    match session.status {
        PaymentStatus::Pending => {}
        PaymentStatus::Expired => return Err(AppError::SessionExpired(msg::SESSION_EXPIRED.into())),
        _ => return Err(AppError::Conflict(msg::SESSION_NOT_PENDING.into())),
    }
    if session.external_reference.is_some() {
        return Err(AppError::Conflict(msg::CHECKOUT_ALREADY_OPEN.into()));
    }
    state.gateways.ensure_available(session.gateway)?;

    open_checkout(state, &session).await
}

/// Apply a gateway's completion signal, identified by the gateway's reference.
///
/// Idempotent: replays and concurrent duplicates of a signal observe the
/// terminal state and return `AlreadyProcessed` without writing anything.
/// A success that arrives after the session expired is queued for
/// reconciliation and reported as `SessionExpired`.
///
/// Does not check which gateway the reference belongs to; signals arriving
/// from a gateway go through [`on_gateway_completion`].
pub fn process_completion(
    conn: &mut Connection,
    external_reference: &str,
    outcome: GatewayOutcome,
    now: i64,
) -> Result<CompletionResult> {
    let session = queries::get_payment_session_by_reference(conn, external_reference)?
        .or_not_found(msg::SESSION_NOT_FOUND)?;
    apply_outcome(conn, &session, outcome, now)
}

fn apply_outcome(
    conn: &mut Connection,
    session: &PaymentSession,
    outcome: GatewayOutcome,
    now: i64,
) -> Result<CompletionResult> {
    let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if outcome == GatewayOutcome::Failure {
        queries::expire_payment_session_if_stale(&tx, &session.id, now)?;
        let transition =
            queries::mark_payment_session_failed(&tx, &session.id, "Gateway reported payment failure")?;
        tx.commit()?;
        return Ok(match transition {
            SessionTransition::Applied => {
                tracing::info!("Payment session failed: session={}", session.id);
                CompletionResult::Failed {
                    session_id: session.id.clone(),
                }
            }
            SessionTransition::Unchanged(status) => {
                tracing::info!(
                    "Failure signal for session {} ignored, already {}",
                    session.id,
                    status.as_ref()
                );
                CompletionResult::AlreadyProcessed { status }
            }
        });
    }

    // The claim and booking creation share a savepoint so a failed creation can
    // be undone without releasing the write lock: the session goes straight from
    // claimed to failed and no other caller ever sees it pending again.
    let savepoint = tx.savepoint()?;
    match queries::mark_payment_session_completed(&savepoint, &session.id, now)? {
        SessionTransition::Applied => {}
        SessionTransition::Unchanged(PaymentStatus::Expired) => {
            let details = format!(
                "Gateway reported success at {} after expiry at {}; {} cents collected",
                now, session.expires_at, session.amount_due_cents
            );
            queries::record_reconciliation_item(
                &savepoint,
                &session.id,
                session.external_reference.as_deref(),
                ReconciliationReason::LateCompletion,
                Some(details.as_str()),
                now,
            )?;
            savepoint.commit()?;
            tx.commit()?;
            tracing::warn!(
                "Late completion for expired session {} (reference {:?}) queued for reconciliation",
                session.id,
                session.external_reference
            );
            return Err(AppError::SessionExpired(msg::SESSION_EXPIRED.into()));
        }
        SessionTransition::Unchanged(status) => {
            tracing::info!(
                "Duplicate completion for session {} ignored, already {}",
                session.id,
                status.as_ref()
            );
            return Ok(CompletionResult::AlreadyProcessed { status });
        }
    }

    let claimed =
        queries::get_payment_session(&savepoint, &session.id)?.or_not_found(msg::SESSION_NOT_FOUND)?;
    match bookings::create_bookings_from_session(&savepoint, &claimed, now) {
        Ok(bookings) => {
            savepoint.commit()?;
            tx.commit()?;
            tracing::info!(
                "Payment session completed: session={}, bookings={}",
                claimed.id,
                bookings.len()
            );
            Ok(CompletionResult::Completed {
                session: claimed,
                bookings,
            })
        }
        Err(e) => {
            // Dropping the savepoint rolls back the claim and every partial write
            drop(savepoint);
            fail_after_rollback(&tx, session, &e, now)?;
            tx.commit()?;
            Err(match e {
                AppError::Conflict(message) => AppError::Conflict(message),
                other => AppError::Conflict(format!("Booking creation failed: {}", other)),
            })
        }
    }
}

/// Booking creation rolled back: the session ends failed, and if the gateway
/// took money a human has to settle it. Runs in the completion's transaction.
fn fail_after_rollback(
    conn: &Connection,
    session: &PaymentSession,
    cause: &AppError,
    now: i64,
) -> Result<()> {
    let reason = cause.to_string();
    tracing::error!(
        "Booking creation rolled back for session {}: {}",
        session.id,
        reason
    );
    queries::mark_payment_session_failed(conn, &session.id, &reason)?;
    if session.amount_due_cents > 0 {
        queries::record_reconciliation_item(
            conn,
            &session.id,
            session.external_reference.as_deref(),
            ReconciliationReason::CreationFailed,
            Some(reason.as_str()),
            now,
        )?;
    }
    Ok(())
}

/// Process a completion signal reported by `gateway` and notify for any
/// bookings it created.
///
/// A reference belonging to a session of another gateway is treated as
/// unknown: one gateway can never settle another gateway's checkout.
pub fn on_gateway_completion(
    state: &AppState,
    gateway: GatewayKind,
    external_reference: &str,
    outcome: GatewayOutcome,
    now: i64,
) -> Result<CompletionResult> {
    let mut conn = state.db.get()?;
    let session = queries::get_payment_session_by_reference(&conn, external_reference)?
        .filter(|session| session.gateway == gateway)
        .or_not_found(msg::SESSION_NOT_FOUND)?;
    let result = apply_outcome(&mut conn, &session, outcome, now)?;
    if let CompletionResult::Completed { bookings, .. } = &result {
        state.notifier.booking_confirmed(bookings, now);
    }
    Ok(result)
}

/// Read-only view of a session. A stale pending session reads as expired;
/// bookings are included once the session has completed.
pub fn poll_status(conn: &Connection, session_id: &str, now: i64) -> Result<PaymentSessionStatus> {
    let session =
        queries::get_payment_session(conn, session_id)?.or_not_found(msg::SESSION_NOT_FOUND)?;
    let status = session.effective_status(now);
    let bookings_data = if status == PaymentStatus::Completed {
        Some(queries::list_bookings_for_session(conn, &session.id)?)
    } else {
        None
    };

    Ok(PaymentSessionStatus {
        payment_session_id: session.id,
        status,
        amount_total_cents: session.amount_total_cents,
        amount_due_cents: session.amount_due_cents,
        bookings_data,
    })
}

pub fn cancel_booking(
    state: &AppState,
    booking_id: &str,
    actor: CancelActor,
    reason: Option<&str>,
    now: i64,
) -> Result<CancelledBooking> {
    let mut conn = state.db.get()?;
    let (cancelled, booking) = bookings::cancel_booking(&mut conn, booking_id, actor, reason, now)?;
    state.notifier.booking_cancelled(&booking, now);
    Ok(cancelled)
}

/// Expire every pending session past its TTL. Run periodically by the server.
pub fn sweep_expired_sessions(conn: &Connection, now: i64) -> Result<usize> {
    let expired = queries::expire_stale_payment_sessions(conn, now)?;
    if expired > 0 {
        tracing::info!("Expired {} stale payment session(s)", expired);
    }
    Ok(expired)
}
