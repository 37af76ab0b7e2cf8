//! Order endpoints: direct commit, queries, status updates and deletion.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{Order, OrderId, OrderStatus};
use serde::Deserialize;
use store::{OrderStore, PlaceOrder};

use crate::AppState;
use crate::auth::CurrentActor;
use crate::error::ApiError;
use crate::extract::JsonBody;

/// Request body for `PATCH /orders/{id}/status`.
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// POST /orders: commits an order directly from explicit lines.
pub async fn create<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    JsonBody(request): JsonBody<PlaceOrder>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state
        .coordinator
        .orders()
        .place_order(actor.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders: the caller's orders, newest first.
pub async fn list<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<Order>>, ApiError> {
    let orders = state.coordinator.orders().orders_for(actor).await?;
    Ok(Json(orders))
}

/// GET /orders/{id}
pub async fn get<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .coordinator
        .orders()
        .get_order_for(OrderId::new(id), actor)
        .await?;
    Ok(Json(order))
}

/// GET /orders/by-ref/{tx_ref}: looks an order up by its payment reference.
pub async fn by_payment_ref<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    Path(payment_ref): Path<String>,
) -> Result<Json<Order>, ApiError> {
    state
        .coordinator
        .orders()
        .order_by_payment_ref_for(&payment_ref, actor)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No order for payment reference {payment_ref}")))
}

/// PATCH /orders/{id}/status: seller-driven fulfillment transition.
pub async fn update_status<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
    JsonBody(request): JsonBody<UpdateStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let next: OrderStatus = request.status.parse()?;
    let order = state
        .coordinator
        .orders()
        .update_status(OrderId::new(id), next, actor)
        .await?;
    Ok(Json(order))
}

/// DELETE /orders/{id}: soft-deletes one of the caller's orders.
pub async fn delete<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .orders()
        .delete_order(OrderId::new(id), actor)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /seller/orders: orders containing the seller's products.
pub async fn seller_orders<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<Order>>, ApiError> {
    let orders = state.coordinator.orders().seller_orders(actor).await?;
    Ok(Json(orders))
}
