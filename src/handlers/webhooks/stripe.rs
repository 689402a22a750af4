use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::db::AppState;
use crate::models::GatewayKind;
use crate::payments::StripeWebhookEvent;

use super::common::{WebhookResult, complete_payment};

fn extract_signature(headers: &HeaderMap) -> Result<&str, WebhookResult> {
    headers
        .get("stripe-signature")
        .ok_or((StatusCode::UNAUTHORIZED, "Missing stripe-signature header"))?
        .to_str()
        .map_err(|e| {
            tracing::debug!("Invalid UTF-8 in Stripe signature header: {}", e);
            (StatusCode::UNAUTHORIZED, "Invalid signature header")
        })
}

/// Stripe checkout webhook.
///
/// The signature is checked before the body is parsed; nothing is read or
/// written for an unverified call.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let Some(stripe) = state.gateways.stripe.as_ref() else {
        tracing::warn!("Stripe webhook received but Stripe is not configured");
        return (StatusCode::NOT_FOUND, "Stripe not configured");
    };

    let signature = match extract_signature(&headers) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Stripe webhook rejected: {}", e.1);
            return e;
        }
    };

    match stripe.verify_webhook_signature(&body, signature) {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!("Stripe webhook rejected: signature mismatch");
            return (StatusCode::UNAUTHORIZED, "Invalid signature");
        }
        Err(e) => {
            tracing::warn!("Stripe webhook rejected: {}", e);
            return (StatusCode::UNAUTHORIZED, "Invalid signature");
        }
    }

    let event: StripeWebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!("Invalid Stripe webhook payload: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let completion = match event.completion() {
        Ok(Some(c)) => c,
        Ok(None) => {
            tracing::debug!(
                "Stripe event {} ({:?}) ignored",
                event.event_type,
                event.id
            );
            return (StatusCode::OK, "Event ignored");
        }
        Err(e) => {
            tracing::warn!("Invalid Stripe {} object: {}", event.event_type, e);
            return (StatusCode::BAD_REQUEST, "Invalid checkout session");
        }
    };

    complete_payment(
        &state,
        GatewayKind::Stripe,
        &completion.external_reference,
        completion.outcome,
    )
}
