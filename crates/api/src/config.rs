//! Application configuration loaded from environment variables.

use std::time::Duration;

use domain::Money;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: Postgres connection string; in-memory store when unset
/// - `FRONTEND_URL`: where payment callbacks redirect the buyer
/// - `PUBLIC_URL`: this service's externally reachable base URL
/// - `CHAPA_SECRET_KEY`, `CHAPA_BASE_URL`
/// - `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`, `STRIPE_BASE_URL`
/// - `GATEWAY_TIMEOUT_SECS` (default: `30`)
/// - `PENDING_ORDER_TTL_SECS` (default: `3600`)
/// - `SWEEP_INTERVAL_SECS` (default: `300`)
/// - `SHIPPING_FEE_CENTS` (default: `0`)
/// - `ORDER_NUMBER_PREFIX` (default: `"ORD"`)
/// - `WEBHOOK_TOLERANCE_SECS` (default: `300`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub frontend_url: String,
    pub public_url: String,
    pub chapa_secret_key: Option<String>,
    pub chapa_base_url: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_base_url: String,
    pub gateway_timeout: Duration,
    pub pending_order_ttl: Duration,
    pub sweep_interval: Duration,
    pub shipping_fee: Money,
    pub order_number_prefix: String,
    pub webhook_tolerance: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup. Blank values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, default: u64| {
            Duration::from_secs(get(key).and_then(|v| v.parse().ok()).unwrap_or(default))
        };
        let defaults = Self::default();

        Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: get("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match get("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: get("DATABASE_URL"),
            frontend_url: get("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            public_url: get("PUBLIC_URL").unwrap_or(defaults.public_url),
            chapa_secret_key: get("CHAPA_SECRET_KEY"),
            chapa_base_url: get("CHAPA_BASE_URL").unwrap_or(defaults.chapa_base_url),
            stripe_secret_key: get("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: get("STRIPE_WEBHOOK_SECRET"),
            stripe_base_url: get("STRIPE_BASE_URL").unwrap_or(defaults.stripe_base_url),
            gateway_timeout: secs("GATEWAY_TIMEOUT_SECS", 30),
            pending_order_ttl: secs("PENDING_ORDER_TTL_SECS", 3600),
            sweep_interval: secs("SWEEP_INTERVAL_SECS", 300),
            shipping_fee: get("SHIPPING_FEE_CENTS")
                .and_then(|v| v.parse().ok())
                .map(Money::from_cents)
                .unwrap_or(defaults.shipping_fee),
            order_number_prefix: get("ORDER_NUMBER_PREFIX")
                .unwrap_or(defaults.order_number_prefix),
            webhook_tolerance: secs("WEBHOOK_TOLERANCE_SECS", 300),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL the redirect gateway calls back after payment.
    pub fn chapa_callback_url(&self) -> String {
        format!(
            "{}/payments/chapa/callback",
            self.public_url.trim_end_matches('/')
        )
    }

    /// Frontend page that shows the payment result.
    pub fn payment_result_url(&self) -> String {
        format!("{}/payment-success", self.frontend_url.trim_end_matches('/'))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            frontend_url: "http://localhost:5173".to_string(),
            public_url: "http://localhost:3000".to_string(),
            chapa_secret_key: None,
            chapa_base_url: "https://api.chapa.co".to_string(),
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_base_url: "https://api.stripe.com".to_string(),
            gateway_timeout: Duration::from_secs(30),
            pending_order_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
            shipping_fee: Money::zero(),
            order_number_prefix: "ORD".to_string(),
            webhook_tolerance: Duration::from_secs(300),
        }
    }
}
