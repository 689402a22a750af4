use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result, msg};
use crate::models::{GatewayOutcome, PaymentSession};

use super::GatewayCheckout;

type HmacSha256 = Hmac<Sha256>;

pub const STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    /// Overridable so tests and staging can point at a stub server
    pub api_base: String,
}

/// Stripe refuses checkout expiries closer than this to the request.
pub const MIN_CHECKOUT_LIFETIME_SECS: i64 = 30 * 60;
/// Stripe refuses checkout expiries further out than this.
pub const MAX_CHECKOUT_LIFETIME_SECS: i64 = 24 * 60 * 60;
/// Covers the delay between building the request and Stripe receiving it.
const CHECKOUT_EXPIRY_MARGIN_SECS: i64 = 60;

/// When the hosted checkout should stop accepting payment: our session's
/// expiry, pulled into the window Stripe accepts.
pub fn checkout_expires_at(session_expires_at: i64, now: i64) -> i64 {
    session_expires_at.clamp(
        now + MIN_CHECKOUT_LIFETIME_SECS + CHECKOUT_EXPIRY_MARGIN_SECS,
        now + MAX_CHECKOUT_LIFETIME_SECS - CHECKOUT_EXPIRY_MARGIN_SECS,
    )
}

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(client: Client, config: &StripeConfig) -> Self {
        Self {
            client,
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Create a hosted checkout for the amount still due on the session.
    ///
    /// Our session ID travels in the checkout metadata; the returned checkout
    /// session ID (`cs_...`) becomes the session's external reference.
    pub async fn create_checkout_session(
        &self,
        session: &PaymentSession,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<GatewayCheckout> {
        let amount = session.amount_due_cents.to_string();
        let expires_at =
            checkout_expires_at(session.expires_at, chrono::Utc::now().timestamp()).to_string();
        let lessons = session.bookings.len();
        let description = if lessons == 1 {
            "Driving lesson".to_string()
        } else {
            format!("{} driving lessons", lessons)
        };

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&[
                ("mode", "payment"),
                ("success_url", success_url),
                ("cancel_url", cancel_url),
                ("client_reference_id", session.id.as_str()),
                ("expires_at", expires_at.as_str()),
                ("line_items[0][quantity]", "1"),
                ("line_items[0][price_data][currency]", session.currency.as_str()),
                ("line_items[0][price_data][unit_amount]", amount.as_str()),
                ("line_items[0][price_data][product_data][name]", description.as_str()),
                ("metadata[lessonpay_session_id]", session.id.as_str()),
                ("metadata[student_id]", session.student_id.as_str()),
                ("metadata[instructor_id]", session.instructor_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "Stripe API error ({}): {}",
                status, error_text
            )));
        }

        let checkout: CreateCheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse Stripe response: {}", e)))?;

        Ok(GatewayCheckout {
            payment_url: checkout.url,
            external_reference: checkout.id,
        })
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Verify a `Stripe-Signature` header (`t=timestamp,v1=signature`) against the payload.
    ///
    /// Returns `Ok(false)` for a well-formed but wrong, stale or future-dated signature
    /// and `Err(BadRequest)` for a malformed header.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        let mut timestamp = None;
        // Several v1 entries are sent while the endpoint secret is being rolled
        let mut candidates = Vec::new();

        for part in signature.split(',') {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                candidates.push(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        if candidates.is_empty() {
            return Err(AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()));
        }

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let age = chrono::Utc::now().timestamp() - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        // Clock skew tolerance: 60 seconds
        if age < -60 {
            tracing::warn!("Stripe webhook rejected: timestamp in the future (age={}s)", age);
            return Ok(false);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        // Length is not secret (always 64 hex chars for SHA-256)
        Ok(candidates.iter().any(|candidate| {
            candidate.len() == expected.len()
                && bool::from(expected.as_bytes().ct_eq(candidate.as_bytes()))
        }))
    }
}

/// Generic Stripe webhook event - object is parsed based on event_type
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    /// "paid", "unpaid" or "no_payment_required"
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: StripeMetadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeMetadata {
    pub lessonpay_session_id: Option<String>,
}

/// A completion signal extracted from a verified Stripe event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeCompletion {
    pub external_reference: String,
    pub outcome: GatewayOutcome,
}

impl StripeWebhookEvent {
    /// Map a checkout event to a completion signal; `Ok(None)` for events we don't act on.
    pub fn completion(&self) -> std::result::Result<Option<StripeCompletion>, serde_json::Error> {
        let outcome = match self.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                GatewayOutcome::Success
            }
            "checkout.session.async_payment_failed" | "checkout.session.expired" => {
                GatewayOutcome::Failure
            }
            _ => return Ok(None),
        };

        let checkout: StripeCheckoutSession = serde_json::from_value(self.data.object.clone())?;

        // Delayed payment methods complete the checkout before the money arrives;
        // the async_payment_succeeded event follows once it does.
        if self.event_type == "checkout.session.completed"
            && checkout.payment_status.as_deref() != Some("paid")
        {
            tracing::info!(
                "Stripe checkout {} completed with payment_status={:?}, awaiting async payment",
                checkout.id,
                checkout.payment_status
            );
            return Ok(None);
        }

        Ok(Some(StripeCompletion {
            external_reference: checkout.id,
            outcome,
        }))
    }
}
