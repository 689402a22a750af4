//! Booking notifications.
//!
//! When `NOTIFICATION_WEBHOOK_URL` is configured, booking confirmations and
//! cancellations are POSTed to the external notification dispatcher, which
//! owns delivery (WhatsApp, email). Every event names the configured sender.
//!
//! Delivery is fire-and-forget: events are spawned after the database commit
//! and a failed delivery never affects the booking.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use reqwest::Client;
use serde::Serialize;

use crate::models::{Booking, CancelActor};

/// Retry delays in milliseconds. Total worst case: 300ms.
const NOTIFY_RETRY_DELAYS: &[u64] = &[100, 200];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingEventKind {
    BookingConfirmed,
    BookingCancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingEvent {
    pub event: BookingEventKind,
    /// Identity the dispatcher sends as
    pub sender: String,
    pub booking_id: String,
    pub student_id: String,
    pub instructor_id: String,
    pub lesson_datetime: i64,
    pub duration_minutes: i64,
    pub pickup_location: String,
    pub payment_session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predecessor_booking_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<CancelActor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_granted_cents: Option<i64>,
    /// Unix timestamp
    pub timestamp: i64,
    /// Unique per event so the dispatcher can drop our retries
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
    webhook_url: Option<String>,
    sender: String,
}

impl Notifier {
    pub fn new(client: Client, webhook_url: Option<String>, sender: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url,
            sender: sender.into(),
        }
    }

    /// A notifier that drops every event.
    pub fn disabled() -> Self {
        Self::new(Client::new(), None, "lessonpay")
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    pub fn event(&self, kind: BookingEventKind, booking: &Booking, now: i64) -> BookingEvent {
        let cancelled = kind == BookingEventKind::BookingCancelled;
        BookingEvent {
            event: kind,
            sender: self.sender.clone(),
            booking_id: booking.id.clone(),
            student_id: booking.student_id.clone(),
            instructor_id: booking.instructor_id.clone(),
            lesson_datetime: booking.lesson_datetime,
            duration_minutes: booking.duration_minutes,
            pickup_location: booking.pickup_location.clone(),
            payment_session_id: booking.payment_session_id.clone(),
            predecessor_booking_id: booking.predecessor_booking_id.clone(),
            cancelled_by: if cancelled { booking.cancelled_by } else { None },
            credit_granted_cents: if cancelled {
                booking.credit_granted_cents
            } else {
                None
            },
            timestamp: now,
            idempotency_key: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn booking_confirmed(&self, bookings: &[Booking], now: i64) {
        for booking in bookings {
            self.spawn(self.event(BookingEventKind::BookingConfirmed, booking, now));
        }
    }

    pub fn booking_cancelled(&self, booking: &Booking, now: i64) {
        self.spawn(self.event(BookingEventKind::BookingCancelled, booking, now));
    }

    /// Spawn a fire-and-forget delivery. No-op when no webhook is configured.
    /// Panics in the spawned task are logged rather than silently swallowed.
    fn spawn(&self, event: BookingEvent) {
        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        let client = self.client.clone();
        let booking_id = event.booking_id.clone();
        tokio::spawn(
            AssertUnwindSafe(async move {
                send_event(&client, &url, &event).await;
            })
            .catch_unwind()
            .map(move |result| {
                if let Err(panic) = result {
                    let panic_msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(
                        "Notification task panicked for booking {}: {}",
                        booking_id,
                        panic_msg
                    );
                }
            }),
        );
    }
}

async fn send_event(client: &Client, url: &str, event: &BookingEvent) {
    for (attempt, delay_ms) in std::iter::once(&0u64)
        .chain(NOTIFY_RETRY_DELAYS.iter())
        .enumerate()
    {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
        }

        match client
            .post(url)
            .json(event)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(
                    "Notification {:?} delivered for booking {} (attempt {})",
                    event.event,
                    event.booking_id,
                    attempt + 1
                );
                return;
            }
            Ok(resp) => {
                tracing::debug!("Notification webhook returned {}", resp.status());
            }
            Err(e) => {
                tracing::debug!("Notification webhook failed: {}", e);
            }
        }
    }

    tracing::warn!(
        "Notification {:?} for booking {} dropped after {} attempts",
        event.event,
        event.booking_id,
        NOTIFY_RETRY_DELAYS.len() + 1
    );
}
