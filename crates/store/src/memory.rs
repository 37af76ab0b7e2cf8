use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain::{
    NewOrder, Order, OrderError, OrderId, OrderNumberGenerator, OrderStatus, PaymentMethod,
    PaymentStatus, Product, ProductId, UserId, price_cart,
};
use tokio::sync::RwLock;

use crate::{NewProduct, Result, StoreError, store::OrderStore};

const MAX_ORDER_NUMBER_ATTEMPTS: u32 = 5;

#[derive(Debug, Default)]
struct MemoryState {
    products: BTreeMap<ProductId, Product>,
    orders: BTreeMap<OrderId, Order>,
    order_numbers: HashSet<String>,
    payments: HashMap<(PaymentMethod, String), OrderId>,
    next_product_id: i64,
    next_order_id: i64,
    fail_on_commit: bool,
}

/// In-memory order store for testing and local runs.
///
/// A single write lock spans every commit, which gives the same
/// all-or-nothing behaviour as the database transaction.
#[derive(Clone)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<MemoryState>>,
    numbers: Arc<OrderNumberGenerator>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::with_order_numbers(OrderNumberGenerator::default())
    }

    /// Creates a store that numbers orders with the given generator.
    pub fn with_order_numbers(numbers: OrderNumberGenerator) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            numbers: Arc::new(numbers),
        }
    }

    /// Makes every following commit fail after validation, as a failed
    /// insert would.
    pub async fn set_fail_on_commit(&self, fail: bool) {
        self.state.write().await.fail_on_commit = fail;
    }

    /// Returns the number of stored orders, soft-deleted ones included.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the current stock of a product.
    pub async fn stock_of(&self, id: ProductId) -> Option<i64> {
        self.state.read().await.products.get(&id).map(|p| p.stock)
    }
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    orders
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        let mut state = self.state.write().await;
        state.next_product_id += 1;
        let product = Product {
            id: ProductId::new(state.next_product_id),
            seller_id: product.seller_id,
            name: product.name,
            price: product.price,
            stock: product.stock,
        };
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn commit_order(&self, order: NewOrder) -> Result<Order> {
        order.check_lines()?;

        let mut state = self.state.write().await;

        let products: HashMap<ProductId, Product> = order
            .lines
            .iter()
            .filter_map(|line| state.products.get(&line.product_id))
            .map(|p| (p.id, p.clone()))
            .collect();
        let priced = price_cart(&order.lines, &products, order.shipping_fee)?;

        let payment_key = order
            .payment_ref
            .as_ref()
            .filter(|r| !r.is_empty())
            .map(|r| (order.payment_method, r.clone()));
        if let Some(key) = &payment_key
            && state.payments.contains_key(key)
        {
            return Err(StoreError::DuplicatePayment {
                method: key.0,
                payment_ref: key.1.clone(),
            });
        }

        if state.fail_on_commit {
            return Err(StoreError::Unavailable("order insert failed".to_string()));
        }

        let order_number = (0..MAX_ORDER_NUMBER_ATTEMPTS)
            .map(|_| self.numbers.next())
            .find(|n| !state.order_numbers.contains(n))
            .ok_or(StoreError::OrderNumberExhausted(MAX_ORDER_NUMBER_ATTEMPTS))?;

        // Every check has passed; from here on nothing can fail.
        for item in &priced.items {
            if let Some(product) = state.products.get_mut(&item.product_id) {
                product.stock -= i64::from(item.quantity);
            }
        }

        state.next_order_id += 1;
        let now = Utc::now();
        let committed = Order {
            id: OrderId::new(state.next_order_id),
            order_number: order_number.clone(),
            user_id: order.user_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Paid,
            payment_method: order.payment_method,
            payment_ref: order.payment_ref,
            shipping: order.shipping,
            subtotal: priced.subtotal,
            shipping_fee: priced.shipping_fee,
            total: priced.total,
            items: priced.items,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        state.order_numbers.insert(order_number);
        if let Some(key) = payment_key {
            state.payments.insert(key, committed.id);
        }
        state.orders.insert(committed.id, committed.clone());

        Ok(committed)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.get(&id).filter(|o| !o.is_deleted()).cloned())
    }

    async fn find_by_payment_ref(&self, payment_ref: &str) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|o| !o.is_deleted() && o.payment_ref.as_deref() == Some(payment_ref))
            .cloned())
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let orders = state
            .orders
            .values()
            .filter(|o| !o.is_deleted() && o.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(orders))
    }

    async fn orders_for_seller(&self, seller_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let orders = state
            .orders
            .values()
            .filter(|o| !o.is_deleted())
            .filter(|o| {
                o.items.iter().any(|item| {
                    state
                        .products
                        .get(&item.product_id)
                        .is_some_and(|p| p.seller_id == seller_id)
                })
            })
            .cloned()
            .collect();
        Ok(newest_first(orders))
    }

    async fn sellers_for_order(&self, id: OrderId) -> Result<Vec<UserId>> {
        let state = self.state.read().await;
        let Some(order) = state.orders.get(&id).filter(|o| !o.is_deleted()) else {
            return Ok(Vec::new());
        };
        let mut sellers: Vec<UserId> = order
            .items
            .iter()
            .filter_map(|item| state.products.get(&item.product_id))
            .map(|p| p.seller_id)
            .collect();
        sellers.sort();
        sellers.dedup();
        Ok(sellers)
    }

    async fn transition_status(&self, id: OrderId, next: OrderStatus) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .filter(|o| !o.is_deleted())
            .ok_or(OrderError::OrderNotFound(id))?;

        order.status = order.status.transition_to(next)?;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn soft_delete_order(&self, id: OrderId) -> Result<()> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .filter(|o| !o.is_deleted())
            .ok_or(OrderError::OrderNotFound(id))?;
        let now = Utc::now();
        order.deleted_at = Some(now);
        order.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use domain::{CartLine, Money, ShippingInfo};

    use super::*;

    fn shipping() -> ShippingInfo {
        ShippingInfo {
            address: "Bole Road 12".to_string(),
            city: "Addis Ababa".to_string(),
            state: "Addis Ababa".to_string(),
            zip: None,
            phone: "0912345678".to_string(),
            notes: None,
        }
    }

    fn new_order(lines: Vec<CartLine>, payment_ref: Option<&str>) -> NewOrder {
        NewOrder {
            user_id: UserId::new(1),
            shipping: shipping(),
            payment_method: PaymentMethod::Chapa,
            payment_ref: payment_ref.map(String::from),
            lines,
            shipping_fee: Money::zero(),
        }
    }

    async fn seeded() -> (InMemoryOrderStore, Product, Product) {
        let store = InMemoryOrderStore::new();
        let a = store
            .insert_product(NewProduct::new(10, "A", Money::from_units(50), 5))
            .await
            .unwrap();
        let b = store
            .insert_product(NewProduct::new(20, "B", Money::from_units(30), 1))
            .await
            .unwrap();
        (store, a, b)
    }

    #[tokio::test]
    async fn test_commit_decrements_stock_and_records_order() {
        let (store, a, b) = seeded().await;

        let order = store
            .commit_order(new_order(
                vec![CartLine::new(a.id, 2), CartLine::new(b.id, 1)],
                Some("tx1"),
            ))
            .await
            .unwrap();

        assert_eq!(order.subtotal, Money::from_units(130));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(store.stock_of(a.id).await, Some(3));
        assert_eq!(store.stock_of(b.id).await, Some(0));
        assert_eq!(
            store.find_by_payment_ref("tx1").await.unwrap().unwrap().id,
            order.id
        );
    }

    #[tokio::test]
    async fn test_failed_validation_leaves_stock_untouched() {
        let (store, a, b) = seeded().await;

        let err = store
            .commit_order(new_order(
                vec![CartLine::new(a.id, 2), CartLine::new(b.id, 2)],
                None,
            ))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::Order(OrderError::InsufficientStock { .. })
        ));
        assert_eq!(store.stock_of(a.id).await, Some(5));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back() {
        let (store, a, _) = seeded().await;
        store.set_fail_on_commit(true).await;

        let result = store
            .commit_order(new_order(vec![CartLine::new(a.id, 1)], None))
            .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.stock_of(a.id).await, Some(5));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_payment_is_rejected() {
        let (store, a, _) = seeded().await;
        store
            .commit_order(new_order(vec![CartLine::new(a.id, 1)], Some("pi_1")))
            .await
            .unwrap();

        let err = store
            .commit_order(new_order(vec![CartLine::new(a.id, 1)], Some("pi_1")))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::DuplicatePayment { .. }));
        assert_eq!(store.stock_of(a.id).await, Some(4));
    }

    #[tokio::test]
    async fn test_soft_deleted_orders_are_hidden() {
        let (store, a, _) = seeded().await;
        let order = store
            .commit_order(new_order(vec![CartLine::new(a.id, 1)], None))
            .await
            .unwrap();

        store.soft_delete_order(order.id).await.unwrap();

        assert!(store.get_order(order.id).await.unwrap().is_none());
        assert!(store.orders_for_user(UserId::new(1)).await.unwrap().is_empty());
        assert_eq!(store.order_count().await, 1);
        assert!(store.soft_delete_order(order.id).await.is_err());
    }

    #[tokio::test]
    async fn test_transition_status_follows_state_machine() {
        let (store, a, _) = seeded().await;
        let order = store
            .commit_order(new_order(vec![CartLine::new(a.id, 1)], None))
            .await
            .unwrap();

        let err = store
            .transition_status(order.id, OrderStatus::Shipped)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Order(OrderError::InvalidTransition { .. })
        ));

        let updated = store
            .transition_status(order.id, OrderStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_sellers_for_order() {
        let (store, a, b) = seeded().await;
        let order = store
            .commit_order(new_order(
                vec![CartLine::new(a.id, 1), CartLine::new(b.id, 1)],
                None,
            ))
            .await
            .unwrap();

        let sellers = store.sellers_for_order(order.id).await.unwrap();
        assert_eq!(sellers, vec![UserId::new(10), UserId::new(20)]);

        let seller_orders = store.orders_for_seller(UserId::new(20)).await.unwrap();
        assert_eq!(seller_orders.len(), 1);
        assert!(
            store
                .orders_for_seller(UserId::new(99))
                .await
                .unwrap()
                .is_empty()
        );
    }
}
