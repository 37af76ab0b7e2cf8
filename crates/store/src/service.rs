//! Order service: authorization, shipping policy and metrics around a store.

use std::time::Instant;

use domain::{
    Actor, CartLine, Money, NewOrder, Order, OrderError, OrderId, OrderStatus, PaymentMethod,
    ShippingInfo, UserId,
};
use serde::{Deserialize, Serialize};

use crate::{Result, store::OrderStore};

/// A buyer's request to turn a cart into an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    #[serde(flatten)]
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub payment_ref: Option<String>,
    #[serde(alias = "items")]
    pub lines: Vec<CartLine>,
}

/// Service for managing orders.
///
/// Wraps an [`OrderStore`] with the rules that depend on who is asking:
/// buyers see their own orders, sellers see and advance orders that
/// contain their products.
#[derive(Clone)]
pub struct OrderService<S: OrderStore> {
    store: S,
    shipping_fee: Money,
}

impl<S: OrderStore> OrderService<S> {
    /// Creates a new order service with free shipping.
    pub fn new(store: S) -> Self {
        Self {
            store,
            shipping_fee: Money::zero(),
        }
    }

    /// Sets the flat shipping fee added to every order.
    pub fn with_shipping_fee(mut self, fee: Money) -> Self {
        self.shipping_fee = fee;
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn shipping_fee(&self) -> Money {
        self.shipping_fee
    }

    /// Commits an order for `user_id`.
    #[tracing::instrument(skip(self, request), fields(method = %request.payment_method))]
    pub async fn place_order(&self, user_id: UserId, request: PlaceOrder) -> Result<Order> {
        request.shipping.validate()?;

        let new_order = NewOrder {
            user_id,
            shipping: request.shipping,
            payment_method: request.payment_method,
            payment_ref: request.payment_ref,
            lines: request.lines,
            shipping_fee: self.shipping_fee,
        };

        let start = Instant::now();
        let result = self.store.commit_order(new_order).await;
        metrics::histogram!("order_commit_duration_seconds").record(start.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                metrics::counter!("orders_committed_total").increment(1);
                tracing::info!(
                    order_id = %order.id,
                    order_number = %order.order_number,
                    total = %order.total,
                    "Order committed"
                );
            }
            Err(e) => {
                metrics::counter!("order_commit_failures_total").increment(1);
                tracing::warn!(error = %e, "Order commit failed");
            }
        }
        result
    }

    /// Loads an order the actor may see.
    ///
    /// Orders the actor neither placed nor sells into are reported as not
    /// found.
    #[tracing::instrument(skip(self))]
    pub async fn get_order_for(&self, order_id: OrderId, actor: Actor) -> Result<Order> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;

        if self.can_view(&order, actor).await? {
            Ok(order)
        } else {
            Err(OrderError::OrderNotFound(order_id).into())
        }
    }

    /// Loads the order paid with `payment_ref`, if the actor may see it.
    #[tracing::instrument(skip(self))]
    pub async fn order_by_payment_ref_for(
        &self,
        payment_ref: &str,
        actor: Actor,
    ) -> Result<Option<Order>> {
        match self.store.find_by_payment_ref(payment_ref).await? {
            Some(order) if self.can_view(&order, actor).await? => Ok(Some(order)),
            _ => Ok(None),
        }
    }

    /// Lists the actor's own orders, newest first.
    pub async fn orders_for(&self, actor: Actor) -> Result<Vec<Order>> {
        self.store.orders_for_user(actor.user_id).await
    }

    /// Lists orders containing the seller's products, newest first.
    pub async fn seller_orders(&self, actor: Actor) -> Result<Vec<Order>> {
        if !actor.is_seller() {
            return Err(OrderError::Forbidden("only sellers can list seller orders".into()).into());
        }
        self.store.orders_for_seller(actor.user_id).await
    }

    /// Advances an order's fulfillment status.
    ///
    /// Only a seller with a product in the order may do this, and only along
    /// an allowed transition.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: OrderId,
        next: OrderStatus,
        actor: Actor,
    ) -> Result<Order> {
        if !actor.is_seller() {
            return Err(OrderError::Forbidden("only sellers can update order status".into()).into());
        }

        let sellers = self.store.sellers_for_order(order_id).await?;
        if sellers.is_empty() {
            return Err(OrderError::OrderNotFound(order_id).into());
        }
        if !sellers.contains(&actor.user_id) {
            return Err(OrderError::Forbidden(format!(
                "order {order_id} contains none of your products"
            ))
            .into());
        }

        let order = self.store.transition_status(order_id, next).await?;
        tracing::info!(order_id = %order.id, status = %order.status, "Order status updated");
        Ok(order)
    }

    /// Soft-deletes one of the actor's own orders.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order(&self, order_id: OrderId, actor: Actor) -> Result<()> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;

        if order.user_id != actor.user_id {
            return Err(OrderError::OrderNotFound(order_id).into());
        }
        self.store.soft_delete_order(order_id).await
    }

    async fn can_view(&self, order: &Order, actor: Actor) -> Result<bool> {
        if order.user_id == actor.user_id {
            return Ok(true);
        }
        if actor.is_seller() {
            let sellers = self.store.sellers_for_order(order.id).await?;
            return Ok(sellers.contains(&actor.user_id));
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryOrderStore, NewProduct, StoreError};

    fn shipping() -> ShippingInfo {
        ShippingInfo {
            address: "Bole Road 12".to_string(),
            city: "Addis Ababa".to_string(),
            state: "Addis Ababa".to_string(),
            zip: None,
            phone: "0912345678".to_string(),
            notes: Some("Leave at the gate".to_string()),
        }
    }

    async fn service_with_product() -> (OrderService<InMemoryOrderStore>, domain::Product) {
        let store = InMemoryOrderStore::new();
        let product = store
            .insert_product(NewProduct::new(10, "Coffee", Money::from_units(25), 10))
            .await
            .unwrap();
        (OrderService::new(store), product)
    }

    fn request(product: &domain::Product, quantity: u32) -> PlaceOrder {
        PlaceOrder {
            shipping: shipping(),
            payment_method: PaymentMethod::Stripe,
            payment_ref: None,
            lines: vec![CartLine::new(product.id, quantity)],
        }
    }

    #[tokio::test]
    async fn test_place_order_applies_shipping_fee() {
        let (service, product) = service_with_product().await;
        let service = service.with_shipping_fee(Money::from_cents(500));

        let order = service
            .place_order(UserId::new(1), request(&product, 2))
            .await
            .unwrap();

        assert_eq!(order.subtotal, Money::from_units(50));
        assert_eq!(order.total, Money::from_cents(5500));
    }

    #[tokio::test]
    async fn test_place_order_rejects_missing_shipping() {
        let (service, product) = service_with_product().await;
        let mut req = request(&product, 1);
        req.shipping.city = String::new();

        let err = service.place_order(UserId::new(1), req).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Order(OrderError::InvalidShipping(_))
        ));
    }

    #[tokio::test]
    async fn test_orders_are_private_to_buyer_and_selling_seller() {
        let (service, product) = service_with_product().await;
        let order = service
            .place_order(UserId::new(1), request(&product, 1))
            .await
            .unwrap();

        assert!(service.get_order_for(order.id, Actor::buyer(1)).await.is_ok());
        assert!(service.get_order_for(order.id, Actor::seller(10)).await.is_ok());
        assert!(service.get_order_for(order.id, Actor::buyer(2)).await.is_err());
        assert!(service.get_order_for(order.id, Actor::seller(11)).await.is_err());
    }

    #[tokio::test]
    async fn test_only_owning_seller_updates_status() {
        let (service, product) = service_with_product().await;
        let order = service
            .place_order(UserId::new(1), request(&product, 1))
            .await
            .unwrap();

        let buyer = service
            .update_status(order.id, OrderStatus::Confirmed, Actor::buyer(1))
            .await
            .unwrap_err();
        assert!(matches!(buyer, StoreError::Order(OrderError::Forbidden(_))));

        let stranger = service
            .update_status(order.id, OrderStatus::Confirmed, Actor::seller(99))
            .await
            .unwrap_err();
        assert!(matches!(stranger, StoreError::Order(OrderError::Forbidden(_))));

        let updated = service
            .update_status(order.id, OrderStatus::Confirmed, Actor::seller(10))
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_delete_order_only_by_owner() {
        let (service, product) = service_with_product().await;
        let order = service
            .place_order(UserId::new(1), request(&product, 1))
            .await
            .unwrap();

        assert!(service.delete_order(order.id, Actor::buyer(2)).await.is_err());
        service.delete_order(order.id, Actor::buyer(1)).await.unwrap();
        assert!(service.orders_for(Actor::buyer(1)).await.unwrap().is_empty());
    }
}
