//! Cancellation credit policy.
//!
//! Cancelled lessons are compensated with ledger credit rather than refunds.
//! How much of the lesson's value comes back depends on who cancels and how
//! close to the lesson the cancellation happens:
//!
//! | actor | time until lesson | credit |
//! |-------|-------------------|--------|
//! | admin | any               | 100%   |
//! | other | >= 24h            | 90%    |
//! | other | (0, 24h)          | 50%    |
//! | other | <= 0              | 0%     |

use crate::models::CancelActor;

/// Cancellations at least this far ahead of the lesson get the generous tier.
pub const GENEROUS_NOTICE_SECS: i64 = 24 * 60 * 60;

const BASIS_POINTS_PER_UNIT: i64 = 10_000;

/// Share of a lesson's value returned as credit, in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CreditFraction(u16);

impl CreditFraction {
    pub const FULL: Self = Self(10_000);
    pub const GENEROUS: Self = Self(9_000);
    pub const PARTIAL: Self = Self(5_000);
    pub const NONE: Self = Self(0);

    pub fn basis_points(&self) -> u16 {
        self.0
    }

    /// Credit owed on `value_cents`, rounded down to the cent.
    pub fn apply(&self, value_cents: i64) -> i64 {
        if value_cents <= 0 {
            return 0;
        }
        let credit = i128::from(value_cents) * i128::from(self.0) / i128::from(BASIS_POINTS_PER_UNIT);
        credit as i64
    }
}

/// Maps a cancellation to its credit tier. Pure; `cancel_time` is supplied by the caller.
pub fn compute_credit_fraction(
    lesson_datetime: i64,
    cancel_time: i64,
    actor: CancelActor,
) -> CreditFraction {
    if actor == CancelActor::Admin {
        return CreditFraction::FULL;
    }

    let notice_secs = lesson_datetime - cancel_time;
    if notice_secs >= GENEROUS_NOTICE_SECS {
        CreditFraction::GENEROUS
    } else if notice_secs > 0 {
        CreditFraction::PARTIAL
    } else {
        CreditFraction::NONE
    }
}
