//! Payment gateway endpoints: initiation, callbacks and webhooks.

use std::sync::Arc;

use axum::Json;
use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Redirect, Response};
use bytes::Bytes;
use checkout::{
    CallbackPayload, CallbackResult, CheckoutError, Customer, PaymentHandle, SettlementOutcome,
};
use domain::PaymentMethod;
use serde::{Deserialize, Serialize};
use store::OrderStore;
use url::form_urlencoded;

use crate::AppState;
use crate::auth::CurrentActor;
use crate::error::ApiError;
use crate::extract::JsonBody;

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Request body for `POST /payments/chapa/initialize`.
#[derive(Debug, Deserialize)]
pub struct InitializeChapa {
    pub tx_ref: String,
    #[serde(flatten)]
    pub customer: Customer,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Request body for `POST /payments/stripe/intent`.
#[derive(Debug, Deserialize)]
pub struct CreateIntent {
    pub tx_ref: String,
    /// Receipt address, forwarded to Stripe when present.
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// A started payment and what the client needs to finish it.
#[derive(Debug, Serialize)]
pub struct InitiatedPayment {
    pub tx_ref: String,
    #[serde(flatten)]
    pub handle: PaymentHandle,
}

/// POST /payments/chapa/initialize: starts a hosted Chapa checkout.
pub async fn initialize_chapa<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    JsonBody(request): JsonBody<InitializeChapa>,
) -> Result<Json<InitiatedPayment>, ApiError> {
    let handle = state
        .coordinator
        .initiate_payment(
            actor,
            PaymentMethod::Chapa,
            &request.tx_ref,
            request.customer,
            request.currency,
        )
        .await?;

    Ok(Json(InitiatedPayment {
        tx_ref: request.tx_ref,
        handle,
    }))
}

/// POST /payments/stripe/intent: creates a Stripe PaymentIntent.
pub async fn create_stripe_intent<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    JsonBody(request): JsonBody<CreateIntent>,
) -> Result<Json<InitiatedPayment>, ApiError> {
    let customer = Customer {
        email: request.email.unwrap_or_default(),
        ..Customer::default()
    };
    let handle = state
        .coordinator
        .initiate_payment(
            actor,
            PaymentMethod::Stripe,
            &request.tx_ref,
            customer,
            request.currency,
        )
        .await?;

    Ok(Json(InitiatedPayment {
        tx_ref: request.tx_ref,
        handle,
    }))
}

/// GET|POST /payments/chapa/callback: settles a Chapa payment.
///
/// The buyer's browser may land here, so every settled outcome redirects to
/// the frontend result page. Non-final statuses are acknowledged as JSON.
pub async fn chapa_callback<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload = CallbackPayload {
        query,
        content_type: header_value(&headers, header::CONTENT_TYPE.as_str()),
        signature: None,
        body,
    };

    let result = state
        .coordinator
        .receive_callback(PaymentMethod::Chapa, &payload)
        .await;
    record_callback(PaymentMethod::Chapa, result.is_ok());

    let params: Vec<(&str, String)> = match result {
        Ok(CallbackResult::Settled(outcome)) => match outcome {
            SettlementOutcome::OrderCreated(order) => vec![
                ("status", "success".to_string()),
                ("order_id", order.id.to_string()),
                ("tx_ref", order.payment_ref.unwrap_or_default()),
            ],
            SettlementOutcome::AlreadySettled { tx_ref }
            | SettlementOutcome::NothingPending { tx_ref } => {
                vec![("status", "success".to_string()), ("tx_ref", tx_ref)]
            }
            SettlementOutcome::PaymentFailed { tx_ref } => {
                vec![("status", "failed".to_string()), ("tx_ref", tx_ref)]
            }
        },
        Ok(CallbackResult::Ignored { tx_ref, status }) => {
            return Ok(Json(serde_json::json!({
                "received": true,
                "tx_ref": tx_ref,
                "status": status,
            }))
            .into_response());
        }
        Ok(CallbackResult::Unidentified) => vec![("status", "failed".to_string())],
        Err(CheckoutError::GatewayUnavailable(method)) => {
            return Err(CheckoutError::GatewayUnavailable(method).into());
        }
        Err(CheckoutError::Gateway(e)) => {
            tracing::warn!(error = %e, "Unreadable payment callback");
            vec![("status", "failed".to_string())]
        }
        Err(CheckoutError::Commit { tx_ref, source }) => vec![
            ("status", "error".to_string()),
            ("tx_ref", tx_ref),
            ("error", source.to_string()),
        ],
        Err(e) => vec![("status", "error".to_string()), ("error", e.to_string())],
    };

    Ok(Redirect::to(&result_url(&state.payment_result_url, &params)).into_response())
}

/// POST /payments/stripe/webhook: settles a Stripe payment.
///
/// Unsigned or badly signed deliveries are rejected with 400 before any
/// state is touched.
pub async fn stripe_webhook<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let payload = CallbackPayload {
        query: None,
        content_type: header_value(&headers, header::CONTENT_TYPE.as_str()),
        signature: header_value(&headers, STRIPE_SIGNATURE_HEADER),
        body,
    };

    let result = state
        .coordinator
        .receive_callback(PaymentMethod::Stripe, &payload)
        .await;
    record_callback(PaymentMethod::Stripe, result.is_ok());
    let result = result?;

    let order_id = match &result {
        CallbackResult::Settled(SettlementOutcome::OrderCreated(order)) => Some(order.id),
        _ => None,
    };
    Ok(Json(serde_json::json!({
        "received": true,
        "order_id": order_id,
    })))
}

fn record_callback(gateway: PaymentMethod, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    metrics::counter!(
        "payment_callbacks_total",
        "gateway" => gateway.as_str(),
        "result" => result
    )
    .increment(1);
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn result_url(base: &str, params: &[(&str, String)]) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
        .finish();
    format!("{base}?{query}")
}
