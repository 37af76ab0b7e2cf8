//! HTTP API server for marketplace checkout and orders.
//!
//! Provides REST endpoints for staging a checkout, paying through Chapa or
//! Stripe, receiving their callbacks, and managing orders, with structured
//! logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use checkout::{
    ChapaConfig, ChapaGateway, GatewayError, GatewayRegistry, InMemoryPendingOrderStore,
    NotificationQueue, PendingOrderStore, SettlementCoordinator, StripeConfig, StripeGateway,
};
use metrics_exporter_prometheus::PrometheusHandle;
use store::{OrderService, OrderStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared state of the HTTP handlers.
pub struct AppState<S: OrderStore> {
    pub coordinator: SettlementCoordinator<S>,
    /// Frontend page that payment callbacks redirect to.
    pub payment_result_url: String,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout", post(routes::checkout::stage::<S>))
        .route(
            "/payments/chapa/initialize",
            post(routes::payments::initialize_chapa::<S>),
        )
        .route(
            "/payments/chapa/callback",
            get(routes::payments::chapa_callback::<S>)
                .post(routes::payments::chapa_callback::<S>),
        )
        .route(
            "/payments/stripe/intent",
            post(routes::payments::create_stripe_intent::<S>),
        )
        .route(
            "/payments/stripe/webhook",
            post(routes::payments::stripe_webhook::<S>),
        )
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list::<S>),
        )
        .route(
            "/orders/{id}",
            get(routes::orders::get::<S>).delete(routes::orders::delete::<S>),
        )
        .route(
            "/orders/by-ref/{tx_ref}",
            get(routes::orders::by_payment_ref::<S>),
        )
        .route(
            "/orders/{id}/status",
            patch(routes::orders::update_status::<S>),
        )
        .route("/seller/orders", get(routes::orders::seller_orders::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Registers every gateway whose credentials are configured.
///
/// Stripe needs both its API key and its webhook secret: without the secret
/// its webhooks could not be verified.
pub fn gateway_registry(config: &Config) -> Result<GatewayRegistry, GatewayError> {
    let mut registry = GatewayRegistry::new();

    match &config.chapa_secret_key {
        Some(secret) => {
            let chapa = ChapaConfig::new(
                secret.clone(),
                config.chapa_callback_url(),
                config.payment_result_url(),
            )
            .with_base_url(config.chapa_base_url.clone())
            .with_timeout(config.gateway_timeout);
            registry.register(Arc::new(ChapaGateway::new(chapa)?));
        }
        None => tracing::warn!("CHAPA_SECRET_KEY not set; Chapa payments disabled"),
    }

    match (&config.stripe_secret_key, &config.stripe_webhook_secret) {
        (Some(secret), Some(webhook_secret)) => {
            let stripe = StripeConfig::new(secret.clone(), webhook_secret.clone())
                .with_base_url(config.stripe_base_url.clone())
                .with_timeout(config.gateway_timeout)
                .with_tolerance(config.webhook_tolerance);
            registry.register(Arc::new(StripeGateway::new(stripe)?));
        }
        (Some(_), None) => {
            tracing::warn!("STRIPE_WEBHOOK_SECRET not set; Stripe payments disabled");
        }
        _ => tracing::warn!("STRIPE_SECRET_KEY not set; Stripe payments disabled"),
    }

    Ok(registry)
}

/// Creates the application state around an order store.
pub fn create_default_state<S: OrderStore + 'static>(
    store: S,
    config: &Config,
    notifications: Option<NotificationQueue>,
) -> Result<Arc<AppState<S>>, GatewayError> {
    let orders = OrderService::new(store).with_shipping_fee(config.shipping_fee);
    let pending: Arc<dyn PendingOrderStore> =
        Arc::new(InMemoryPendingOrderStore::with_ttl(config.pending_order_ttl));

    let mut coordinator = SettlementCoordinator::new(orders, pending, gateway_registry(config)?);
    if let Some(queue) = notifications {
        coordinator = coordinator.with_notifications(queue);
    }

    Ok(Arc::new(AppState {
        coordinator,
        payment_result_url: config.payment_result_url(),
    }))
}
