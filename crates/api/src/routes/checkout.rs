//! Checkout staging endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use checkout::{CheckoutRequest, StagedCheckout};
use store::OrderStore;

use crate::AppState;
use crate::auth::CurrentActor;
use crate::error::ApiError;
use crate::extract::JsonBody;

/// POST /checkout: validates the cart and stages it for payment.
///
/// Nothing is written to the order store until the gateway confirms payment.
pub async fn stage<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    JsonBody(request): JsonBody<CheckoutRequest>,
) -> Result<(StatusCode, Json<StagedCheckout>), ApiError> {
    let staged = state.coordinator.stage_checkout(actor, request).await?;
    Ok((StatusCode::CREATED, Json(staged)))
}
