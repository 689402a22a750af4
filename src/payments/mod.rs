mod mock;
mod stripe;

pub use mock::*;
pub use stripe::*;

use crate::error::{AppError, Result, msg};
use crate::models::{GatewayKind, PaymentSession};

/// What a gateway hands back when a checkout is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCheckout {
    /// Where the student completes payment
    pub payment_url: String,
    /// Gateway's identifier for the checkout, used to route its completion back
    pub external_reference: String,
}

/// The gateways available to this deployment.
///
/// Stripe is present only when both keys are configured; the mock gateway
/// only in dev mode.
#[derive(Debug, Clone, Default)]
pub struct Gateways {
    pub stripe: Option<StripeClient>,
    pub mock: Option<MockGateway>,
}

impl Gateways {
    pub fn ensure_available(&self, kind: GatewayKind) -> Result<()> {
        match kind {
            GatewayKind::Stripe if self.stripe.is_none() => {
                Err(AppError::BadRequest(msg::STRIPE_NOT_CONFIGURED.into()))
            }
            GatewayKind::Mock if self.mock.is_none() => {
                Err(AppError::BadRequest(msg::MOCK_GATEWAY_DISABLED.into()))
            }
            _ => Ok(()),
        }
    }

    pub fn stripe(&self) -> Result<&StripeClient> {
        self.stripe
            .as_ref()
            .ok_or_else(|| AppError::BadRequest(msg::STRIPE_NOT_CONFIGURED.into()))
    }

    pub fn mock(&self) -> Result<&MockGateway> {
        self.mock
            .as_ref()
            .ok_or_else(|| AppError::BadRequest(msg::MOCK_GATEWAY_DISABLED.into()))
    }

    /// Open a checkout for the session's outstanding amount with the session's gateway.
    ///
    /// The student is returned to the session's status page whether they pay or abandon.
    pub async fn initiate(&self, session: &PaymentSession, base_url: &str) -> Result<GatewayCheckout> {
        match session.gateway {
            GatewayKind::Stripe => {
                let return_url = format!("{}/payment-sessions/{}", base_url, session.id);
                self.stripe()?
                    .create_checkout_session(session, &return_url, &return_url)
                    .await
            }
            GatewayKind::Mock => Ok(self.mock()?.initiate(session)),
        }
    }
}
