//! Settlement coordinator: staging carts and reconciling gateway verdicts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use domain::{
    Actor, CartLine, Money, Order, OrderError, PaymentMethod, Product, ShippingInfo, price_cart,
};
use serde::{Deserialize, Serialize};
use store::{OrderService, OrderStore, PlaceOrder};
use uuid::Uuid;

use crate::error::{CheckoutError, Result};
use crate::gateway::{
    CallbackOutcome, CallbackPayload, Customer, GatewayRegistry, PaymentHandle, PaymentRequest,
    Settlement,
};
use crate::notify::{Notification, NotificationQueue};
use crate::pending::{PendingOrder, PendingOrderStore};

/// A buyer's cart, submitted before paying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    #[serde(flatten)]
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
    #[serde(alias = "items")]
    pub lines: Vec<CartLine>,
    /// Total the client displayed, checked against the catalog.
    #[serde(default, alias = "total_amount")]
    pub total: Option<Money>,
    /// Caller-chosen reference; generated when absent.
    #[serde(default)]
    pub tx_ref: Option<String>,
}

/// A staged cart, ready for payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedCheckout {
    pub tx_ref: String,
    pub total: Money,
}

/// What a settlement did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The staged cart became this order.
    OrderCreated(Order),
    /// An order for this payment already exists.
    AlreadySettled { tx_ref: String },
    /// Nothing was staged under the reference; treated as success.
    NothingPending { tx_ref: String },
    /// The payment failed and the staged cart was discarded.
    PaymentFailed { tx_ref: String },
}

impl SettlementOutcome {
    fn label(&self) -> &'static str {
        match self {
            SettlementOutcome::OrderCreated(_) => "order_created",
            SettlementOutcome::AlreadySettled { .. } => "already_settled",
            SettlementOutcome::NothingPending { .. } => "nothing_pending",
            SettlementOutcome::PaymentFailed { .. } => "payment_failed",
        }
    }
}

/// Result of handling a gateway callback end to end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    Settled(SettlementOutcome),
    Ignored {
        tx_ref: Option<String>,
        status: String,
    },
    Unidentified,
}

/// Orchestrates checkout from staging to committed order.
///
/// The coordinator never branches on which gateway is involved: gateways
/// normalize their callbacks into a [`Settlement`] and it reconciles that
/// with the pending store and the order store.
pub struct SettlementCoordinator<S: OrderStore> {
    orders: OrderService<S>,
    pending: Arc<dyn PendingOrderStore>,
    gateways: GatewayRegistry,
    notifications: Option<NotificationQueue>,
}

impl<S: OrderStore> SettlementCoordinator<S> {
    /// Creates a new settlement coordinator.
    pub fn new(
        orders: OrderService<S>,
        pending: Arc<dyn PendingOrderStore>,
        gateways: GatewayRegistry,
    ) -> Self {
        Self {
            orders,
            pending,
            gateways,
            notifications: None,
        }
    }

    /// Sends a notification for every order created by a settlement.
    pub fn with_notifications(mut self, queue: NotificationQueue) -> Self {
        self.notifications = Some(queue);
        self
    }

    pub fn orders(&self) -> &OrderService<S> {
        &self.orders
    }

    pub fn pending(&self) -> &Arc<dyn PendingOrderStore> {
        &self.pending
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    /// Validates a cart against the catalog and stages it for payment.
    ///
    /// Stock is only checked here, not reserved; the commit re-checks it.
    #[tracing::instrument(skip(self, request), fields(user_id = %actor.user_id))]
    pub async fn stage_checkout(
        &self,
        actor: Actor,
        request: CheckoutRequest,
    ) -> Result<StagedCheckout> {
        request.shipping.validate()?;
        check_lines(&request.lines)?;

        let products = self.load_products(&request.lines).await?;
        let priced = price_cart(&request.lines, &products, self.orders.shipping_fee())?;

        if let Some(declared) = request.total
            && declared != priced.total
        {
            tracing::warn!(
                declared = %declared,
                computed = %priced.total,
                "Declared checkout total differs from catalog price"
            );
        }

        let tx_ref = match request.tx_ref.filter(|r| !r.trim().is_empty()) {
            Some(tx_ref) => {
                // A reused reference would settle onto the earlier order.
                if self.orders.store().find_by_payment_ref(&tx_ref).await?.is_some() {
                    return Err(CheckoutError::DuplicateReference(tx_ref));
                }
                tx_ref
            }
            None => new_tx_ref(),
        };

        self.pending
            .put(PendingOrder {
                tx_ref: tx_ref.clone(),
                user_id: actor.user_id,
                shipping: request.shipping,
                payment_method: request.payment_method,
                lines: request.lines,
                total: priced.total,
                created_at: Utc::now(),
            })
            .await?;

        metrics::counter!("checkout_staged_total").increment(1);
        tracing::info!(%tx_ref, total = %priced.total, "Checkout staged");

        Ok(StagedCheckout {
            tx_ref,
            total: priced.total,
        })
    }

    /// Starts payment for one of the actor's staged carts.
    #[tracing::instrument(skip(self, customer), fields(user_id = %actor.user_id))]
    pub async fn initiate_payment(
        &self,
        actor: Actor,
        method: PaymentMethod,
        tx_ref: &str,
        customer: Customer,
        currency: Option<String>,
    ) -> Result<PaymentHandle> {
        let gateway = self
            .gateways
            .get(method)
            .ok_or(CheckoutError::GatewayUnavailable(method))?;

        let pending = self
            .pending
            .get(tx_ref)
            .await
            .filter(|p| p.user_id == actor.user_id)
            .ok_or_else(|| CheckoutError::PendingNotFound(tx_ref.to_string()))?;

        if pending.payment_method != method {
            return Err(CheckoutError::MethodMismatch {
                tx_ref: tx_ref.to_string(),
                staged: pending.payment_method,
                requested: method,
            });
        }

        let request = PaymentRequest {
            tx_ref: pending.tx_ref,
            amount: pending.total,
            currency,
            customer,
            description: None,
        };
        Ok(gateway.initiate(&request).await?)
    }

    /// Reads a gateway callback and settles it.
    #[tracing::instrument(skip(self, payload))]
    pub async fn receive_callback(
        &self,
        method: PaymentMethod,
        payload: &CallbackPayload,
    ) -> Result<CallbackResult> {
        let gateway = self
            .gateways
            .get(method)
            .ok_or(CheckoutError::GatewayUnavailable(method))?;

        match gateway.parse_callback(payload)? {
            CallbackOutcome::Settled(settlement) => {
                Ok(CallbackResult::Settled(self.settle(settlement).await?))
            }
            CallbackOutcome::Ignored { tx_ref, status } => {
                tracing::info!(?tx_ref, %status, "Callback needs no action");
                Ok(CallbackResult::Ignored { tx_ref, status })
            }
            CallbackOutcome::Unidentified => {
                tracing::warn!("Callback without a transaction reference");
                Ok(CallbackResult::Unidentified)
            }
        }
    }

    /// Reconciles a gateway verdict with the staged cart.
    ///
    /// Safe to call more than once for the same payment: a repeated success
    /// finds nothing staged, or hits the per-payment uniqueness of orders.
    #[tracing::instrument(skip(self), fields(tx_ref = %settlement.tx_ref))]
    pub async fn settle(&self, settlement: Settlement) -> Result<SettlementOutcome> {
        let result = if settlement.succeeded {
            self.settle_success(settlement).await
        } else {
            self.pending.delete(&settlement.tx_ref).await;
            tracing::info!("Payment failed; pending order discarded");
            Ok(SettlementOutcome::PaymentFailed {
                tx_ref: settlement.tx_ref,
            })
        };

        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "error",
        };
        metrics::counter!("settlements_total", "outcome" => label).increment(1);
        result
    }

    async fn settle_success(&self, settlement: Settlement) -> Result<SettlementOutcome> {
        let Settlement {
            tx_ref,
            payment_ref,
            ..
        } = settlement;

        let Some(pending) = self.pending.take(&tx_ref).await else {
            tracing::info!("No pending order; settlement already handled or never staged");
            return Ok(SettlementOutcome::NothingPending { tx_ref });
        };

        let request = PlaceOrder {
            shipping: pending.shipping.clone(),
            payment_method: pending.payment_method,
            payment_ref: Some(payment_ref),
            lines: pending.lines.clone(),
        };

        match self.orders.place_order(pending.user_id, request).await {
            Ok(order) => {
                if order.total != pending.total {
                    tracing::warn!(
                        staged = %pending.total,
                        charged = %order.total,
                        "Committed total differs from staged total"
                    );
                }
                if let Some(queue) = &self.notifications {
                    queue.enqueue(Notification::from(&order));
                }
                Ok(SettlementOutcome::OrderCreated(order))
            }
            Err(e) if e.is_duplicate_payment() => {
                tracing::warn!(
                    user_id = %pending.user_id,
                    lines = ?pending.lines,
                    total = %pending.total,
                    "Payment already recorded on an order; dropping staged cart"
                );
                Ok(SettlementOutcome::AlreadySettled { tx_ref })
            }
            Err(source) => {
                tracing::error!(error = %source, "Order commit failed; restoring pending order");
                self.pending.restore(pending).await;
                Err(CheckoutError::Commit { tx_ref, source })
            }
        }
    }

    async fn load_products(
        &self,
        lines: &[CartLine],
    ) -> Result<HashMap<domain::ProductId, Product>> {
        let mut products = HashMap::new();
        for line in lines {
            if products.contains_key(&line.product_id) {
                continue;
            }
            if let Some(product) = self.orders.store().get_product(line.product_id).await? {
                products.insert(product.id, product);
            }
        }
        Ok(products)
    }
}

fn check_lines(lines: &[CartLine]) -> std::result::Result<(), OrderError> {
    if lines.is_empty() {
        return Err(OrderError::NoItems);
    }
    match lines.iter().find(|line| line.quantity == 0) {
        Some(line) => Err(OrderError::InvalidQuantity {
            product_id: line.product_id,
            quantity: line.quantity,
        }),
        None => Ok(()),
    }
}

fn new_tx_ref() -> String {
    format!("tx-{}", Uuid::new_v4().simple())
}
