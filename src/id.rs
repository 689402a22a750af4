//! Prefixed ID generation for lessonpay entities.
//!
//! All IDs use an `lp_` brand prefix so they never collide with payment gateway
//! references (Stripe's `cs_`, `pi_`, ...) that are stored alongside them.
//!
//! Format: `lp_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// Entity types that have prefixed IDs.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    PaymentSession,
    Booking,
    CreditEntry,
    ReconciliationItem,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::PaymentSession => "lp_ps",
            Self::Booking => "lp_bk",
            Self::CreditEntry => "lp_cr",
            Self::ReconciliationItem => "lp_rec",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
