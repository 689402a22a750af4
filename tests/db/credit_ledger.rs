//! Credit ledger tests: grants, FIFO consumption, and the non-negative invariant.

#[path = "../common/mod.rs"]
mod common;

use common::*;
use rusqlite::Connection;

/// Booking rows to hang grants off (each source booking carries at most one grant).
fn source_bookings(conn: &mut Connection, count: usize, now: i64) -> Vec<String> {
    (0..count)
        .map(|i| create_confirmed_booking(conn, STUDENT, now + (10 + i as i64) * DAY, 1000, now).id)
        .collect()
}

#[test]
fn test_grant_and_available_total() {
    let mut conn = setup_test_db();
    let now = now();
    let sources = source_bookings(&mut conn, 2, now);

    let entry = queries::grant_credit(&conn, STUDENT, &sources[0], 10000, now).unwrap();
    assert!(entry.id.starts_with("lp_cr_"));
    assert_eq!(entry.amount_cents, 10000);
    assert_eq!(entry.remaining_cents, 10000);

    queries::grant_credit(&conn, STUDENT, &sources[1], 2500, now + 1).unwrap();

    assert_eq!(queries::get_available_credit_total(&conn, STUDENT).unwrap(), 12500);
    assert_eq!(queries::get_available_credit_total(&conn, OTHER_STUDENT).unwrap(), 0);
}

#[test]
fn test_grant_rejects_non_positive_amounts() {
    let mut conn = setup_test_db();
    let now = now();
    let sources = source_bookings(&mut conn, 1, now);

    for amount in [0, -100] {
        let result = queries::grant_credit(&conn, STUDENT, &sources[0], amount, now);
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
    assert!(queries::list_available_credits(&conn, STUDENT).unwrap().is_empty());
}

#[test]
fn test_one_grant_per_source_booking() {
    let mut conn = setup_test_db();
    let now = now();
    let sources = source_bookings(&mut conn, 1, now);

    queries::grant_credit(&conn, STUDENT, &sources[0], 5000, now).unwrap();
    let duplicate = queries::grant_credit(&conn, STUDENT, &sources[0], 5000, now);
    assert!(duplicate.is_err());
    assert_eq!(queries::get_available_credit_total(&conn, STUDENT).unwrap(), 5000);
}

#[test]
fn test_consume_draws_oldest_first_across_entries() {
    let mut conn = setup_test_db();
    let now = now();
    let sources = source_bookings(&mut conn, 3, now);

    let oldest = queries::grant_credit(&conn, STUDENT, &sources[0], 3000, now - 300).unwrap();
    let middle = queries::grant_credit(&conn, STUDENT, &sources[1], 4000, now - 200).unwrap();
    let newest = queries::grant_credit(&conn, STUDENT, &sources[2], 5000, now - 100).unwrap();

    let applied = queries::consume_credit(&conn, STUDENT, 5000).unwrap();
    assert_eq!(applied, 5000);

    let remaining: Vec<(String, i64)> = queries::list_available_credits(&conn, STUDENT)
        .unwrap()
        .into_iter()
        .map(|e| (e.id, e.remaining_cents))
        .collect();
    assert_eq!(remaining, vec![(middle.id, 2000), (newest.id, 5000)]);
    assert!(
        !remaining.iter().any(|(id, _)| *id == oldest.id),
        "drained entries are no longer listed as available"
    );
    assert_eq!(queries::get_available_credit_total(&conn, STUDENT).unwrap(), 7000);
}

#[test]
fn test_consume_never_overdraws() {
    let mut conn = setup_test_db();
    let now = now();
    let sources = source_bookings(&mut conn, 1, now);
    queries::grant_credit(&conn, STUDENT, &sources[0], 4000, now).unwrap();

    let applied = queries::consume_credit(&conn, STUDENT, 10000).unwrap();
    assert_eq!(applied, 4000, "applied is capped at what is available");
    assert_eq!(queries::get_available_credit_total(&conn, STUDENT).unwrap(), 0);

    let again = queries::consume_credit(&conn, STUDENT, 10000).unwrap();
    assert_eq!(again, 0);
    assert_eq!(queries::get_available_credit_total(&conn, STUDENT).unwrap(), 0);
}

#[test]
fn test_consume_zero_is_noop() {
    let mut conn = setup_test_db();
    let now = now();
    let sources = source_bookings(&mut conn, 1, now);
    queries::grant_credit(&conn, STUDENT, &sources[0], 4000, now).unwrap();

    assert_eq!(queries::consume_credit(&conn, STUDENT, 0).unwrap(), 0);
    assert_eq!(queries::get_available_credit_total(&conn, STUDENT).unwrap(), 4000);
}

#[test]
fn test_consume_is_scoped_to_student() {
    let mut conn = setup_test_db();
    let now = now();
    let sources = source_bookings(&mut conn, 1, now);
    queries::grant_credit(&conn, STUDENT, &sources[0], 4000, now).unwrap();

    assert_eq!(queries::consume_credit(&conn, OTHER_STUDENT, 4000).unwrap(), 0);
    assert_eq!(queries::get_available_credit_total(&conn, STUDENT).unwrap(), 4000);
}

#[test]
fn test_remaining_bounds_enforced_by_schema() {
    let mut conn = setup_test_db();
    let now = now();
    let sources = source_bookings(&mut conn, 1, now);
    let entry = queries::grant_credit(&conn, STUDENT, &sources[0], 4000, now).unwrap();

    let negative = conn.execute(
        "UPDATE credit_ledger SET remaining_cents = -1 WHERE id = ?1",
        [&entry.id],
    );
    assert!(negative.is_err(), "remaining_cents must not go below zero");

    let above = conn.execute(
        "UPDATE credit_ledger SET remaining_cents = 4001 WHERE id = ?1",
        [&entry.id],
    );
    assert!(above.is_err(), "remaining_cents must not exceed amount_cents");
}

#[test]
fn test_concurrent_spends_cannot_double_spend() {
    use std::sync::{Arc, Barrier};

    let num_threads = 4;
    let (pool, _dir) = setup_test_pool();
    let now = now();
    seed_credit(&mut pool.get().unwrap(), STUDENT, 10000, now);

    let barrier = Arc::new(Barrier::new(num_threads));
    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let pool = pool.clone();
            std::thread::spawn(move || {
                let mut conn = pool.get().expect("thread failed to get connection");
                barrier.wait();
                let tx = conn
                    .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                    .unwrap();
                let applied = queries::consume_credit(&tx, STUDENT, 6000).unwrap();
                tx.commit().unwrap();
                applied
            })
        })
        .collect();

    let total_applied: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total_applied, 10000, "exactly the granted credit is spent");

    let conn = pool.get().unwrap();
    assert_eq!(queries::get_available_credit_total(&conn, STUDENT).unwrap(), 0);
}
