//! Redirect-based hosted checkout.

use std::time::Duration;

use async_trait::async_trait;
use domain::PaymentMethod;
use serde_json::{Value, json};
use url::Url;

use super::{
    CallbackOutcome, CallbackPayload, DEFAULT_TIMEOUT, PaymentGateway, PaymentHandle,
    PaymentRequest, Settlement, build_client, record_request,
};
use crate::error::GatewayError;

const GATEWAY: PaymentMethod = PaymentMethod::Chapa;

/// Connection settings for the Chapa API.
#[derive(Debug, Clone)]
pub struct ChapaConfig {
    pub secret_key: String,
    pub base_url: String,
    /// Where Chapa notifies this service. `tx_ref` is appended.
    pub callback_url: String,
    /// Where Chapa sends the buyer afterwards. `tx_ref` is appended.
    pub return_url: String,
    pub currency: String,
    pub timeout: Duration,
}

impl ChapaConfig {
    pub fn new(
        secret_key: impl Into<String>,
        callback_url: impl Into<String>,
        return_url: impl Into<String>,
    ) -> Self {
        Self {
            secret_key: secret_key.into(),
            base_url: "https://api.chapa.co".to_string(),
            callback_url: callback_url.into(),
            return_url: return_url.into(),
            currency: "ETB".to_string(),
            timeout: DEFAULT_TIMEOUT,
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
}

/// Chapa adapter: initializes a hosted checkout and reads its callbacks.
pub struct ChapaGateway {
    config: ChapaConfig,
    client: reqwest::Client,
}

impl ChapaGateway {
    pub fn new(config: ChapaConfig) -> Result<Self, GatewayError> {
        let client = build_client(GATEWAY, config.timeout)?;
        Ok(Self { config, client })
    }

    fn with_tx_ref(base: &str, tx_ref: &str) -> Result<String, GatewayError> {
        let mut url = Url::parse(base)
            .map_err(|e| GatewayError::InvalidRequest(format!("invalid url {base}: {e}")))?;
        url.query_pairs_mut().append_pair("tx_ref", tx_ref);
        Ok(url.to_string())
    }

    async fn send(&self, request: &PaymentRequest) -> Result<PaymentHandle, GatewayError> {
        validate_customer(request)?;

        let body = json!({
            "amount": request.amount.to_string(),
            "currency": request.currency.as_deref().unwrap_or(&self.config.currency),
            "email": request.customer.email,
            "first_name": request.customer.first_name,
            "last_name": request.customer.last_name,
            "phone_number": request.customer.phone,
            "tx_ref": request.tx_ref,
            "callback_url": Self::with_tx_ref(&self.config.callback_url, &request.tx_ref)?,
            "return_url": Self::with_tx_ref(&self.config.return_url, &request.tx_ref)?,
            "customization": {
                "title": "Order Payment",
                "description": request.description.as_deref().unwrap_or("Payment for your order"),
            },
        });

        let url = format!(
            "{}/v1/transaction/initialize",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .json(&body)
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
        let value: Value =
            serde_json::from_str(&text).map_err(|e| GatewayError::MalformedResponse {
                gateway: GATEWAY,
                message: format!("HTTP {status}: {e}"),
            })?;

        if !status.is_success() || value["status"] != "success" {
            let message = flatten_message(&value["message"]);
            tracing::warn!(%status, tx_ref = %request.tx_ref, %message, "Chapa rejected payment");
            return Err(GatewayError::Rejected {
                gateway: GATEWAY,
                message,
            });
        }

        let checkout_url = value["data"]["checkout_url"]
            .as_str()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| GatewayError::MalformedResponse {
                gateway: GATEWAY,
                message: "missing data.checkout_url".to_string(),
            })?;

        Ok(PaymentHandle::Redirect {
            checkout_url: checkout_url.to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for ChapaGateway {
    fn method(&self) -> PaymentMethod {
        GATEWAY
    }

    #[tracing::instrument(
        skip(self, request),
        fields(tx_ref = %request.tx_ref, amount = %request.amount)
    )]
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentHandle, GatewayError> {
        let result = self.send(request).await;
        record_request(GATEWAY, &result);
        result
    }

    fn parse_callback(&self, payload: &CallbackPayload) -> Result<CallbackOutcome, GatewayError> {
        let fields = CallbackFields::extract(payload);

        let Some(tx_ref) = fields.tx_ref else {
            return Ok(CallbackOutcome::Unidentified);
        };
        let status = fields.status.unwrap_or_default();

        let succeeded = match status.to_ascii_lowercase().as_str() {
            "success" => true,
            "failed" => false,
            _ => {
                return Ok(CallbackOutcome::Ignored {
                    tx_ref: Some(tx_ref),
                    status,
                });
            }
        };

        Ok(CallbackOutcome::Settled(Settlement {
            payment_ref: tx_ref.clone(),
            tx_ref,
            succeeded,
        }))
    }
}

/// Reference and status gathered from query, form body and JSON body, in
/// that order of precedence.
#[derive(Debug, Default)]
struct CallbackFields {
    tx_ref: Option<String>,
    status: Option<String>,
}

impl CallbackFields {
    fn extract(payload: &CallbackPayload) -> Self {
        let mut fields = Self::default();

        if let Some(query) = &payload.query {
            fields.fill_from_pairs(query.as_bytes());
        }

        let is_form = payload
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if fields.incomplete() && is_form {
            fields.fill_from_pairs(&payload.body);
        }

        if fields.incomplete()
            && !payload.body.is_empty()
            && let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(&payload.body)
        {
            let text = |key: &str| {
                map.get(key)
                    .and_then(Value::as_str)
                    .filter(|v| !v.is_empty())
                    .map(String::from)
            };
            if fields.tx_ref.is_none() {
                fields.tx_ref = text("tx_ref").or_else(|| text("reference"));
            }
            if fields.status.is_none() {
                fields.status = text("status");
            }
        }

        fields
    }

    fn incomplete(&self) -> bool {
        self.tx_ref.is_none() || self.status.is_none()
    }

    fn fill_from_pairs(&mut self, input: &[u8]) {
        for (key, value) in url::form_urlencoded::parse(input) {
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "tx_ref" | "reference" if self.tx_ref.is_none() => {
                    self.tx_ref = Some(value.into_owned())
                }
                "status" if self.status.is_none() => self.status = Some(value.into_owned()),
                _ => {}
            }
        }
    }
}

/// Chapa reports errors either as a string or as `field -> [messages]`.
fn flatten_message(message: &Value) -> String {
    match message {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            let mut parts: Vec<String> = map
                .iter()
                .flat_map(|(field, msgs)| match msgs {
                    Value::Array(items) => items
                        .iter()
                        .map(|m| format!("{field}: {}", m.as_str().unwrap_or_default()))
                        .collect::<Vec<_>>(),
                    Value::String(m) => vec![format!("{field}: {m}")],
                    other => vec![format!("{field}: {other}")],
                })
                .collect();
            parts.sort();
            parts.join("; ")
        }
        Value::Null => "unknown error".to_string(),
        other => other.to_string(),
    }
}

fn validate_customer(request: &PaymentRequest) -> Result<(), GatewayError> {
    if !request.amount.is_positive() {
        return Err(GatewayError::InvalidRequest(
            "Amount must be greater than 0".to_string(),
        ));
    }

    let customer = &request.customer;
    if [&customer.email, &customer.first_name, &customer.last_name]
        .iter()
        .any(|v| v.trim().is_empty())
    {
        return Err(GatewayError::InvalidRequest(
            "Email, first name, and last name are required".to_string(),
        ));
    }
    if !is_plausible_email(&customer.email) {
        return Err(GatewayError::InvalidRequest(
            "Please provide a valid email address".to_string(),
        ));
    }
    if !is_ethiopian_mobile(&customer.phone) {
        return Err(GatewayError::InvalidRequest(
            "Please provide a valid Ethiopian phone number (e.g., 0912345678 or +251912345678)"
                .to_string(),
        ));
    }
    Ok(())
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !local.is_empty()
        && !host.is_empty()
        && tld.len() >= 2
        && tld.chars().all(|c| c.is_ascii_alphabetic())
        && !email.contains(char::is_whitespace)
}

/// Accepts `9XXXXXXXX` optionally prefixed by `0` or `+251`.
fn is_ethiopian_mobile(phone: &str) -> bool {
    let digits = phone
        .strip_prefix("+251")
        .or_else(|| phone.strip_prefix('0'))
        .unwrap_or(phone);
    digits.len() == 9 && digits.starts_with('9') && digits.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn gateway() -> ChapaGateway {
        ChapaGateway::new(ChapaConfig::new(
            "CHASECK_TEST",
            "http://localhost:3000/payments/chapa/callback",
            "http://localhost:5173/payment-success",
        ))
        .unwrap()
    }

    fn settled(outcome: CallbackOutcome) -> Settlement {
        match outcome {
            CallbackOutcome::Settled(s) => s,
            other => panic!("expected settlement, got {other:?}"),
        }
    }

    #[test]
    fn reads_reference_and_status_from_query() {
        let payload = CallbackPayload {
            query: Some("tx_ref=tx-1&status=success".to_string()),
            ..Default::default()
        };
        let s = settled(gateway().parse_callback(&payload).unwrap());
        assert_eq!(s.tx_ref, "tx-1");
        assert!(s.succeeded);
    }

    #[test]
    fn falls_back_to_form_body() {
        let payload = CallbackPayload {
            query: Some("tx_ref=tx-2".to_string()),
            content_type: Some("application/x-www-form-urlencoded".to_string()),
            body: Bytes::from_static(b"status=failed&tx_ref=ignored"),
            ..Default::default()
        };
        let s = settled(gateway().parse_callback(&payload).unwrap());
        assert_eq!(s.tx_ref, "tx-2");
        assert!(!s.succeeded);
    }

    #[test]
    fn falls_back_to_json_reference() {
        let payload = CallbackPayload {
            content_type: Some("application/json".to_string()),
            body: Bytes::from_static(br#"{"reference":"tx-3","status":"success"}"#),
            ..Default::default()
        };
        let s = settled(gateway().parse_callback(&payload).unwrap());
        assert_eq!(s.tx_ref, "tx-3");
        assert_eq!(s.payment_ref, "tx-3");
    }

    #[test]
    fn missing_reference_is_unidentified() {
        let payload = CallbackPayload {
            query: Some("status=success".to_string()),
            ..Default::default()
        };
        assert_eq!(
            gateway().parse_callback(&payload).unwrap(),
            CallbackOutcome::Unidentified
        );
    }

    #[test]
    fn other_statuses_are_ignored() {
        let payload = CallbackPayload {
            query: Some("tx_ref=tx-4&status=pending".to_string()),
            ..Default::default()
        };
        assert_eq!(
            gateway().parse_callback(&payload).unwrap(),
            CallbackOutcome::Ignored {
                tx_ref: Some("tx-4".to_string()),
                status: "pending".to_string()
            }
        );
    }

    #[test]
    fn flattens_validation_messages() {
        let message = json!({
            "email": ["The email must be a valid email address."],
            "amount": ["The amount field is required."]
        });
        assert_eq!(
            flatten_message(&message),
            "amount: The amount field is required.; email: The email must be a valid email address."
        );
    }

    #[test]
    fn phone_and_email_checks() {
        assert!(is_ethiopian_mobile("0912345678"));
        assert!(is_ethiopian_mobile("+251912345678"));
        assert!(is_ethiopian_mobile("912345678"));
        assert!(!is_ethiopian_mobile("0812345678"));
        assert!(!is_ethiopian_mobile("09123"));

        assert!(is_plausible_email("abebe@example.com"));
        assert!(!is_plausible_email("abebe@example"));
        assert!(!is_plausible_email("@example.com"));
    }
}
