//! Intent-based checkout with signed webhooks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::PaymentMethod;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::{
    CallbackOutcome, CallbackPayload, DEFAULT_TIMEOUT, PaymentGateway, PaymentHandle,
    PaymentRequest, Settlement, build_client, record_request,
};
use crate::error::GatewayError;

type HmacSha256 = Hmac<Sha256>;

const GATEWAY: PaymentMethod = PaymentMethod::Stripe;

const EVENT_SUCCEEDED: &str = "payment_intent.succeeded";
/// Terminal: the intent can no longer be paid.
const EVENT_CANCELED: &str = "payment_intent.canceled";

/// Connection settings for the Stripe API.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub currency: String,
    pub description: String,
    pub timeout: Duration,
    /// Maximum accepted age of a webhook signature.
    pub tolerance: Duration,
}

impl StripeConfig {
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
            base_url: "https://api.stripe.com".to_string(),
            currency: "etb".to_string(),
            description: "Order Payment".to_string(),
            timeout: DEFAULT_TIMEOUT,
            tolerance: Duration::from_secs(300),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
}

/// Envelope fields shared by every event type.
#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct IntentObject {
    id: String,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
}

/// Best-effort `metadata.tx_ref` of an arbitrary event object.
fn metadata_tx_ref(data: &serde_json::Value) -> Option<String> {
    data.pointer("/object/metadata/tx_ref")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

/// Stripe adapter: creates PaymentIntents and verifies webhooks.
pub struct StripeGateway {
    config: StripeConfig,
    client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, GatewayError> {
        let client = build_client(GATEWAY, config.timeout)?;
        Ok(Self { config, client })
    }

    async fn create_intent(&self, request: &PaymentRequest) -> Result<PaymentHandle, GatewayError> {
        if !request.amount.is_positive() {
            return Err(GatewayError::InvalidRequest(
                "Amount must be greater than 0".to_string(),
            ));
        }

        let currency = request
            .currency
            .as_deref()
            .unwrap_or(&self.config.currency)
            .to_ascii_lowercase();
        let description = request
            .description
            .clone()
            .unwrap_or_else(|| self.config.description.clone());

        let mut params = vec![
            ("amount", request.amount.cents().to_string()),
            ("currency", currency),
            ("description", description),
            ("metadata[tx_ref]", request.tx_ref.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];
        if !request.customer.email.is_empty() {
            params.push(("receipt_email", request.customer.email.clone()));
        }

        let url = format!(
            "{}/v1/payment_intents",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.secret_key, Some(""))
            .form(&params)
            .send()
            .await
            .map_err(|source| GatewayError::Transport {
                gateway: GATEWAY,
                source,
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| GatewayError::Transport {
                gateway: GATEWAY,
                source,
            })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .ok()
                .and_then(|e| e.error.message.or(e.error.code))
                .unwrap_or_else(|| format!("HTTP {status}"));
            tracing::warn!(%status, tx_ref = %request.tx_ref, %message, "Stripe rejected intent");
            return Err(GatewayError::Rejected {
                gateway: GATEWAY,
                message,
            });
        }

        let intent: IntentResponse =
            serde_json::from_str(&text).map_err(|e| GatewayError::MalformedResponse {
                gateway: GATEWAY,
                message: e.to_string(),
            })?;

        tracing::info!(payment_ref = %intent.id, "PaymentIntent created");
        Ok(PaymentHandle::ClientSecret {
            client_secret: intent.client_secret,
            payment_ref: intent.id,
        })
    }

    fn verify(&self, payload: &CallbackPayload, now: DateTime<Utc>) -> Result<(), GatewayError> {
        let header = payload
            .signature
            .as_deref()
            .ok_or_else(|| GatewayError::InvalidSignature("missing signature header".to_string()))?;
        verify_signature(
            &payload.body,
            header,
            &self.config.webhook_secret,
            self.config.tolerance,
            now,
        )
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn method(&self) -> PaymentMethod {
        GATEWAY
    }

    #[tracing::instrument(
        skip(self, request),
        fields(tx_ref = %request.tx_ref, amount = %request.amount)
    )]
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentHandle, GatewayError> {
        let result = self.create_intent(request).await;
        record_request(GATEWAY, &result);
        result
    }

    fn parse_callback(&self, payload: &CallbackPayload) -> Result<CallbackOutcome, GatewayError> {
        self.verify(payload, Utc::now())?;

        let event: WebhookEvent = serde_json::from_slice(&payload.body)
            .map_err(|e| GatewayError::InvalidRequest(format!("malformed webhook event: {e}")))?;

        // A declined attempt (`payment_intent.payment_failed`) leaves the
        // intent retryable, so the staged cart stays until success,
        // cancellation or expiry.
        let succeeded = match event.kind.as_str() {
            EVENT_SUCCEEDED => true,
            EVENT_CANCELED => false,
            _ => {
                return Ok(CallbackOutcome::Ignored {
                    tx_ref: metadata_tx_ref(&event.data),
                    status: event.kind,
                });
            }
        };

        let object = event
            .data
            .get("object")
            .cloned()
            .ok_or_else(|| GatewayError::InvalidRequest("event without data.object".to_string()))?;
        let intent: IntentObject = serde_json::from_value(object)
            .map_err(|e| GatewayError::InvalidRequest(format!("malformed payment intent: {e}")))?;

        match intent.metadata.get("tx_ref").filter(|r| !r.is_empty()) {
            Some(tx_ref) => Ok(CallbackOutcome::Settled(Settlement {
                tx_ref: tx_ref.clone(),
                payment_ref: intent.id,
                succeeded,
            })),
            None => Ok(CallbackOutcome::Unidentified),
        }
    }
}

/// Checks a `t=<unix>,v1=<hex>` signature header against `body`.
///
/// The signed message is `"{t}.{body}"`. Any `v1` entry may match, and the
/// timestamp must lie within `tolerance` of `now`.
pub fn verify_signature(
    body: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: DateTime<Utc>,
) -> Result<(), GatewayError> {
    let mut timestamp: Option<&str> = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| GatewayError::InvalidSignature("missing timestamp".to_string()))?;
    if candidates.is_empty() {
        return Err(GatewayError::InvalidSignature(
            "no v1 signature present".to_string(),
        ));
    }

    let signed_at: i64 = timestamp
        .parse()
        .map_err(|_| GatewayError::InvalidSignature("malformed timestamp".to_string()))?;
    if (now.timestamp() - signed_at).unsigned_abs() > tolerance.as_secs() {
        return Err(GatewayError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::InvalidSignature(e.to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    let matched = candidates
        .iter()
        .filter_map(|candidate| hex::decode(candidate).ok())
        .any(|expected| mac.clone().verify_slice(&expected).is_ok());

    if matched {
        Ok(())
    } else {
        Err(GatewayError::InvalidSignature(
            "signature mismatch".to_string(),
        ))
    }
}

/// Builds the signature header a webhook sender would attach to `body`.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::InvalidSignature(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}
