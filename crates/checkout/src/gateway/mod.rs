//! Payment gateway adapters.
//!
//! Each gateway starts a payment in its own way, a hosted checkout redirect
//! for Chapa and a client-confirmed intent for Stripe, but both report back
//! as the same [`Settlement`].

mod chapa;
mod stripe;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use domain::{Money, PaymentMethod};
use serde::{Deserialize, Serialize};

pub use chapa::{ChapaConfig, ChapaGateway};
pub use stripe::{StripeConfig, StripeGateway, sign_payload};

use crate::error::GatewayError;

/// Default timeout for outbound gateway calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The paying customer as the gateway sees them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

/// A request to start collecting payment for a staged cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub tx_ref: String,
    pub amount: Money,
    /// Gateway default when `None`.
    pub currency: Option<String>,
    pub customer: Customer,
    pub description: Option<String>,
}

/// What the client needs to complete the payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentHandle {
    /// Send the buyer to a hosted checkout page.
    Redirect { checkout_url: String },
    /// Confirm the payment client-side with this secret.
    ClientSecret {
        client_secret: String,
        payment_ref: String,
    },
}

/// A callback or webhook request as received over HTTP.
#[derive(Debug, Clone, Default)]
pub struct CallbackPayload {
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    pub content_type: Option<String>,
    /// Signature header, for gateways that sign their webhooks.
    pub signature: Option<String>,
    pub body: Bytes,
}

/// A gateway's verdict on a payment, independent of which gateway sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Reference of the staged cart.
    pub tx_ref: String,
    /// The gateway's own payment reference, stored on the order.
    pub payment_ref: String,
    pub succeeded: bool,
}

/// Result of reading a gateway callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The payment reached a final state.
    Settled(Settlement),
    /// A well-formed notification that needs no action.
    Ignored {
        tx_ref: Option<String>,
        status: String,
    },
    /// The callback carried no transaction reference.
    Unidentified,
}

/// Common contract of the payment gateways.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Asks the gateway to start collecting `request.amount`.
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentHandle, GatewayError>;

    /// Reads a callback or webhook into a settlement.
    fn parse_callback(&self, payload: &CallbackPayload) -> Result<CallbackOutcome, GatewayError>;
}

/// The gateways that have credentials configured.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        tracing::info!(gateway = %gateway.method(), "Payment gateway registered");
        self.gateways.insert(gateway.method(), gateway);
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&method).cloned()
    }

    pub fn contains(&self, method: PaymentMethod) -> bool {
        self.gateways.contains_key(&method)
    }
}

/// Records the result of an outbound gateway call.
pub(crate) fn record_request<T>(gateway: PaymentMethod, result: &Result<T, GatewayError>) {
    let label = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(
        "gateway_requests_total",
        "gateway" => gateway.as_str(),
        "result" => label
    )
    .increment(1);
}

pub(crate) fn build_client(
    gateway: PaymentMethod,
    timeout: Duration,
) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|source| GatewayError::Transport { gateway, source })
}
