//! LessonPay - payment-gated booking engine for driving lessons
//!
//! Lessons are only booked once their payment session completes. Cancelled
//! lessons are compensated with ledger credit that is drawn down on later
//! checkouts, and reschedules carry a lesson's value into its replacement.

pub mod bookings;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod payments;
pub mod policy;
