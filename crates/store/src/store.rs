use async_trait::async_trait;
use domain::{Money, NewOrder, Order, OrderId, OrderStatus, Product, ProductId, UserId};

use crate::Result;

/// A product to add to the catalog.
///
/// Catalog management lives elsewhere; this exists for seeding and tests.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub seller_id: UserId,
    pub name: String,
    pub price: Money,
    pub stock: i64,
}

impl NewProduct {
    pub fn new(
        seller_id: impl Into<UserId>,
        name: impl Into<String>,
        price: Money,
        stock: i64,
    ) -> Self {
        Self {
            seller_id: seller_id.into(),
            name: name.into(),
            price,
            stock,
        }
    }
}

/// Core trait for order storage implementations.
///
/// All implementations must be thread-safe (Send + Sync). Soft-deleted
/// orders are invisible to every read.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Adds a product to the catalog.
    async fn insert_product(&self, product: NewProduct) -> Result<Product>;

    /// Reads a product with its current price and stock.
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Turns a cart into an order in one atomic step.
    ///
    /// Stock is re-read and locked inside the transaction, validated in
    /// input order, decremented, and the order plus its items inserted under
    /// a fresh unique order number. Any failure leaves stock and orders
    /// untouched.
    async fn commit_order(&self, order: NewOrder) -> Result<Order>;

    /// Loads an order with its items.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Finds the order paid with the given gateway reference.
    async fn find_by_payment_ref(&self, payment_ref: &str) -> Result<Option<Order>>;

    /// Lists a buyer's orders, newest first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Lists orders containing at least one of the seller's products, newest first.
    async fn orders_for_seller(&self, seller_id: UserId) -> Result<Vec<Order>>;

    /// Returns the sellers whose products appear in the order.
    async fn sellers_for_order(&self, id: OrderId) -> Result<Vec<UserId>>;

    /// Moves the order to `next` if the state machine allows it.
    ///
    /// The current status is read and checked under the same lock as the
    /// write, so concurrent transitions cannot skip a state.
    async fn transition_status(&self, id: OrderId, next: OrderStatus) -> Result<Order>;

    /// Marks the order deleted. Its order number stays reserved.
    async fn soft_delete_order(&self, id: OrderId) -> Result<()>;
}
