use std::env;

use crate::payments::{
    Gateways, MIN_CHECKOUT_LIFETIME_SECS, MockGateway, STRIPE_API_BASE, StripeClient, StripeConfig,
};

const DEFAULT_SESSION_TTL_SECS: i64 = 30 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    /// How long a pending payment session stays payable
    pub session_ttl_secs: i64,
    /// ISO 4217 code, lowercase (Stripe's convention)
    pub currency: String,
    /// Present only when both the secret key and the webhook secret are set
    pub stripe: Option<StripeConfig>,
    pub notification_webhook_url: Option<String>,
    /// Sender identity passed to the notification dispatcher
    pub notification_sender: String,
    pub expiry_sweep_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("LESSONPAY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url = env::var("BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let stripe = match (
            non_empty_var("STRIPE_SECRET_KEY"),
            non_empty_var("STRIPE_WEBHOOK_SECRET"),
        ) {
            (Some(secret_key), Some(webhook_secret)) => Some(StripeConfig {
                secret_key,
                webhook_secret,
                api_base: non_empty_var("STRIPE_API_BASE")
                    .unwrap_or_else(|| STRIPE_API_BASE.to_string()),
            }),
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!(
                    "Stripe disabled: STRIPE_SECRET_KEY and STRIPE_WEBHOOK_SECRET must both be set"
                );
                None
            }
            (None, None) => None,
        };

        let session_ttl_secs = env::var("SESSION_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|ttl: &i64| *ttl > 0)
            .unwrap_or(DEFAULT_SESSION_TTL_SECS);
        if stripe.is_some() && session_ttl_secs < MIN_CHECKOUT_LIFETIME_SECS {
            tracing::warn!(
                "SESSION_TTL_SECS={} is shorter than Stripe's minimum checkout lifetime ({}s); \
                 payments in between will land in reconciliation",
                session_ttl_secs,
                MIN_CHECKOUT_LIFETIME_SECS
            );
        }

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "lessonpay.db".to_string()),
            base_url,
            dev_mode,
            session_ttl_secs,
            currency: env::var("CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|_| "zar".to_string()),
            stripe,
            notification_webhook_url: non_empty_var("NOTIFICATION_WEBHOOK_URL"),
            notification_sender: non_empty_var("NOTIFICATION_SENDER")
                .unwrap_or_else(|| "lessonpay".to_string()),
            expiry_sweep_secs: env::var("EXPIRY_SWEEP_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .unwrap_or(60),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Gateways enabled by this configuration. The mock gateway exists only in dev mode.
    pub fn gateways(&self, client: &reqwest::Client) -> Gateways {
        Gateways {
            stripe: self
                .stripe
                .as_ref()
                .map(|stripe| StripeClient::new(client.clone(), stripe)),
            mock: self.dev_mode.then(|| MockGateway::new(&self.base_url)),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
