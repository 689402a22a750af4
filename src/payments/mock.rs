use crate::models::PaymentSession;

use super::GatewayCheckout;

/// Stand-in gateway for local development.
///
/// Never talks to a network. Completions are driven through the dev-only
/// `/dev/mock-gateway/complete` endpoint using the reference issued here.
#[derive(Debug, Clone)]
pub struct MockGateway {
    base_url: String,
}

impl MockGateway {
    pub const REFERENCE_PREFIX: &'static str = "mock_";

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn initiate(&self, session: &PaymentSession) -> GatewayCheckout {
        let external_reference = format!(
            "{}{}",
            Self::REFERENCE_PREFIX,
            uuid::Uuid::new_v4().simple()
        );
        tracing::debug!(
            "Mock checkout opened: session={}, reference={}, amount_due={}",
            session.id,
            external_reference,
            session.amount_due_cents
        );
        GatewayCheckout {
            payment_url: format!(
                "{}/dev/mock-gateway/checkout/{}",
                self.base_url, external_reference
            ),
            external_reference,
        }
    }
}
