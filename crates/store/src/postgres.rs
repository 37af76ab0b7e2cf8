use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    Money, NewOrder, Order, OrderError, OrderId, OrderItem, OrderNumberGenerator, OrderStatus,
    PaymentMethod, PaymentStatus, Product, ProductId, ShippingInfo, UserId, price_cart,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::{NewProduct, Result, StoreError, store::OrderStore};

const MAX_ORDER_NUMBER_ATTEMPTS: u32 = 5;

const ORDER_COLUMNS: &str = r#"
    id, order_number, user_id, status, payment_status, payment_method, payment_ref,
    shipping_address, shipping_city, shipping_state, shipping_zip, shipping_phone, notes,
    subtotal_cents, shipping_fee_cents, total_cents, created_at, updated_at, deleted_at
"#;

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
    numbers: std::sync::Arc<OrderNumberGenerator>,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self::with_order_numbers(pool, OrderNumberGenerator::default())
    }

    /// Creates a store that numbers orders with the given generator.
    pub fn with_order_numbers(pool: PgPool, numbers: OrderNumberGenerator) -> Self {
        Self {
            pool,
            numbers: std::sync::Arc::new(numbers),
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_product(row: &PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::new(row.try_get("id")?),
            seller_id: UserId::new(row.try_get("seller_id")?),
            name: row.try_get("name")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            stock: row.try_get("stock")?,
        })
    }

    fn row_to_item(row: &PgRow) -> Result<OrderItem> {
        let quantity: i32 = row.try_get("quantity")?;
        Ok(OrderItem {
            product_id: ProductId::new(row.try_get("product_id")?),
            product_name: row.try_get("product_name")?,
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::Corrupt(format!("negative quantity {quantity}")))?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            line_total: Money::from_cents(row.try_get("line_total_cents")?),
        })
    }

    fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let payment_status: String = row.try_get("payment_status")?;
        let payment_method: String = row.try_get("payment_method")?;

        Ok(Order {
            id: OrderId::new(row.try_get("id")?),
            order_number: row.try_get("order_number")?,
            user_id: UserId::new(row.try_get("user_id")?),
            status: status.parse().map_err(corrupt)?,
            payment_status: payment_status.parse().map_err(corrupt)?,
            payment_method: payment_method.parse().map_err(corrupt)?,
            payment_ref: row.try_get("payment_ref")?,
            shipping: ShippingInfo {
                address: row.try_get("shipping_address")?,
                city: row.try_get("shipping_city")?,
                state: row.try_get("shipping_state")?,
                zip: row.try_get("shipping_zip")?,
                phone: row.try_get("shipping_phone")?,
                notes: row.try_get("notes")?,
            },
            subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
            shipping_fee: Money::from_cents(row.try_get("shipping_fee_cents")?),
            total: Money::from_cents(row.try_get("total_cents")?),
            items,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }

    /// Loads the items of the given orders, keyed by order id.
    async fn items_for(&self, order_ids: &[i64]) -> Result<HashMap<i64, Vec<OrderItem>>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, product_id, product_name, quantity, unit_price_cents, line_total_cents
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY id ASC
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        for row in &rows {
            let order_id: i64 = row.try_get("order_id")?;
            items
                .entry(order_id)
                .or_default()
                .push(Self::row_to_item(row)?);
        }
        Ok(items)
    }

    /// Attaches items to a batch of order rows, keeping row order.
    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut items = self.items_for(&ids).await?;

        rows.iter()
            .zip(ids)
            .map(|(row, id)| Self::row_to_order(row, items.remove(&id).unwrap_or_default()))
            .collect()
    }

    /// Produces an order number not yet used by any order.
    async fn unused_order_number(&self, tx: &mut Transaction<'_, Postgres>) -> Result<String> {
        for _ in 0..MAX_ORDER_NUMBER_ATTEMPTS {
            let candidate = self.numbers.next();
            let taken: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE order_number = $1)")
                    .bind(&candidate)
                    .fetch_one(&mut **tx)
                    .await?;
            if !taken {
                return Ok(candidate);
            }
            tracing::warn!(order_number = %candidate, "Order number collision, retrying");
        }
        Err(StoreError::OrderNumberExhausted(MAX_ORDER_NUMBER_ATTEMPTS))
    }
}

fn corrupt(message: OrderError) -> StoreError {
    StoreError::Corrupt(message.to_string())
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        let row = sqlx::query(
            r#"
            INSERT INTO products (seller_id, name, price_cents, stock)
            VALUES ($1, $2, $3, $4)
            RETURNING id, seller_id, name, price_cents, stock
            "#,
        )
        .bind(product.seller_id.get())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(product.stock)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_product(&row)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, seller_id, name, price_cents, stock FROM products WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_product).transpose()
    }

    #[tracing::instrument(
        skip(self, order),
        fields(user_id = %order.user_id, lines = order.lines.len())
    )]
    async fn commit_order(&self, order: NewOrder) -> Result<Order> {
        order.check_lines()?;

        let mut product_ids: Vec<i64> = order.lines.iter().map(|l| l.product_id.get()).collect();
        product_ids.sort_unstable();
        product_ids.dedup();

        // Dropping the transaction on any early return rolls it back.
        let mut tx = self.pool.begin().await?;

        // Lock rows in id order so concurrent commits cannot deadlock.
        let rows = sqlx::query(
            r#"
            SELECT id, seller_id, name, price_cents, stock
            FROM products
            WHERE id = ANY($1)
            ORDER BY id ASC
            FOR UPDATE
            "#,
        )
        .bind(&product_ids)
        .fetch_all(&mut *tx)
        .await?;

        let products = rows
            .iter()
            .map(|row| Self::row_to_product(row).map(|p| (p.id, p)))
            .collect::<Result<HashMap<_, _>>>()?;

        let priced = price_cart(&order.lines, &products, order.shipping_fee)?;

        for item in &priced.items {
            let quantity = i64::from(item.quantity);
            let updated = sqlx::query(
                r#"
                UPDATE products
                SET stock = stock - $1, updated_at = NOW()
                WHERE id = $2 AND stock >= $1
                "#,
            )
            .bind(quantity)
            .bind(item.product_id.get())
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() != 1 {
                let available = products.get(&item.product_id).map_or(0, |p| p.stock);
                return Err(OrderError::InsufficientStock {
                    product_id: item.product_id,
                    product_name: item.product_name.clone(),
                    available,
                    requested: item.quantity,
                }
                .into());
            }
        }

        let order_number = self.unused_order_number(&mut tx).await?;

        let insert_sql = format!(
            r#"
            INSERT INTO orders (
                order_number, user_id, status, payment_status, payment_method, payment_ref,
                shipping_address, shipping_city, shipping_state, shipping_zip, shipping_phone, notes,
                subtotal_cents, shipping_fee_cents, total_cents
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = sqlx::query(&insert_sql)
            .bind(&order_number)
            .bind(order.user_id.get())
            .bind(OrderStatus::Pending.as_str())
            .bind(PaymentStatus::Paid.as_str())
            .bind(order.payment_method.as_str())
            .bind(&order.payment_ref)
            .bind(&order.shipping.address)
            .bind(&order.shipping.city)
            .bind(&order.shipping.state)
            .bind(&order.shipping.zip)
            .bind(&order.shipping.phone)
            .bind(&order.shipping.notes)
            .bind(priced.subtotal.cents())
            .bind(priced.shipping_fee.cents())
            .bind(priced.total.cents())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| duplicate_payment(e, order.payment_method, order.payment_ref.as_deref()))?;

        let order_id: i64 = row.try_get("id")?;

        for item in &priced.items {
            sqlx::query(
                r#"
                INSERT INTO order_items
                    (order_id, product_id, product_name, quantity, unit_price_cents, line_total_cents)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order_id)
            .bind(item.product_id.get())
            .bind(&item.product_name)
            .bind(i32::try_from(item.quantity).map_err(|_| {
                StoreError::Order(OrderError::InvalidQuantity {
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
            })?)
            .bind(item.unit_price.cents())
            .bind(item.line_total.cents())
            .execute(&mut *tx)
            .await?;
        }

        let committed = Self::row_to_order(&row, priced.items)?;
        tx.commit().await?;

        tracing::debug!(order_id, order_number = %committed.order_number, "Order committed");
        Ok(committed)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let sql =
            format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND deleted_at IS NULL");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_by_payment_ref(&self, payment_ref: &str) -> Result<Option<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE payment_ref = $1 AND deleted_at IS NULL ORDER BY id ASC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(payment_ref)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE user_id = $1 AND deleted_at IS NULL
            ORDER BY created_at DESC, id DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.get())
            .fetch_all(&self.pool)
            .await?;

        self.hydrate(rows).await
    }

    async fn orders_for_seller(&self, seller_id: UserId) -> Result<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders o
            WHERE o.deleted_at IS NULL
              AND EXISTS (
                SELECT 1
                FROM order_items oi
                JOIN products p ON p.id = oi.product_id
                WHERE oi.order_id = o.id AND p.seller_id = $1
              )
            ORDER BY o.created_at DESC, o.id DESC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(seller_id.get())
            .fetch_all(&self.pool)
            .await?;

        self.hydrate(rows).await
    }

    async fn sellers_for_order(&self, id: OrderId) -> Result<Vec<UserId>> {
        let sellers: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT p.seller_id
            FROM order_items oi
            JOIN orders o ON o.id = oi.order_id
            JOIN products p ON p.id = oi.product_id
            WHERE oi.order_id = $1 AND o.deleted_at IS NULL
            ORDER BY p.seller_id
            "#,
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(sellers.into_iter().map(UserId::new).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn transition_status(&self, id: OrderId, next: OrderStatus) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> = sqlx::query_scalar(
            "SELECT status FROM orders WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await?;

        let current: OrderStatus = current
            .ok_or(OrderError::OrderNotFound(id))?
            .parse()
            .map_err(corrupt)?;
        let next = current.transition_to(next)?;

        sqlx::query("UPDATE orders SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(next.as_str())
            .bind(id.get())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.get_order(id)
            .await?
            .ok_or_else(|| OrderError::OrderNotFound(id).into())
    }

    async fn soft_delete_order(&self, id: OrderId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE orders SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrderError::OrderNotFound(id).into());
        }
        Ok(())
    }
}

fn duplicate_payment(
    e: sqlx::Error,
    method: PaymentMethod,
    payment_ref: Option<&str>,
) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.constraint() == Some("unique_payment_ref")
    {
        return StoreError::DuplicatePayment {
            method,
            payment_ref: payment_ref.unwrap_or_default().to_string(),
        };
    }
    StoreError::Database(e)
}
