//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use domain::{
    CartLine, Money, NewOrder, OrderError, OrderStatus, PaymentMethod, PaymentStatus,
    ShippingInfo, UserId,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{NewProduct, OrderStore, PostgresOrderStore, StoreError};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_marketplace_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresOrderStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE order_items, orders, products RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .unwrap();

    PostgresOrderStore::new(pool)
}

fn shipping() -> ShippingInfo {
    ShippingInfo {
        address: "Bole Road 12".to_string(),
        city: "Addis Ababa".to_string(),
        state: "Addis Ababa".to_string(),
        zip: None,
        phone: "0912345678".to_string(),
        notes: Some("Call on arrival".to_string()),
    }
}

fn new_order(user: i64, lines: Vec<CartLine>, payment_ref: Option<&str>) -> NewOrder {
    NewOrder {
        user_id: UserId::new(user),
        shipping: shipping(),
        payment_method: PaymentMethod::Chapa,
        payment_ref: payment_ref.map(String::from),
        lines,
        shipping_fee: Money::zero(),
    }
}

#[tokio::test]
#[serial]
async fn test_commit_order_persists_order_and_items() {
    let store = get_test_store().await;
    let a = store
        .insert_product(NewProduct::new(7, "A", Money::from_units(50), 5))
        .await
        .unwrap();
    let b = store
        .insert_product(NewProduct::new(8, "B", Money::from_units(30), 1))
        .await
        .unwrap();

    let order = store
        .commit_order(new_order(
            1,
            vec![CartLine::new(a.id, 2), CartLine::new(b.id, 1)],
            Some("tx-1"),
        ))
        .await
        .unwrap();

    assert_eq!(order.total, Money::from_units(130));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Paid);

    let loaded = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.items.len(), 2);
    assert_eq!(loaded.shipping, shipping());
    assert_eq!(loaded.order_number, order.order_number);

    assert_eq!(store.get_product(a.id).await.unwrap().unwrap().stock, 3);
    assert_eq!(store.get_product(b.id).await.unwrap().unwrap().stock, 0);

    let by_ref = store.find_by_payment_ref("tx-1").await.unwrap().unwrap();
    assert_eq!(by_ref.id, order.id);
}

#[tokio::test]
#[serial]
async fn test_insufficient_stock_rolls_back() {
    let store = get_test_store().await;
    let a = store
        .insert_product(NewProduct::new(7, "A", Money::from_units(50), 5))
        .await
        .unwrap();
    let b = store
        .insert_product(NewProduct::new(7, "B", Money::from_units(30), 1))
        .await
        .unwrap();

    let err = store
        .commit_order(new_order(
            1,
            vec![CartLine::new(a.id, 2), CartLine::new(b.id, 2)],
            None,
        ))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StoreError::Order(OrderError::InsufficientStock { .. })
    ));
    assert_eq!(store.get_product(a.id).await.unwrap().unwrap().stock, 5);
    assert!(store.orders_for_user(UserId::new(1)).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn test_duplicate_payment_ref_is_rejected() {
    let store = get_test_store().await;
    let a = store
        .insert_product(NewProduct::new(7, "A", Money::from_units(10), 5))
        .await
        .unwrap();

    store
        .commit_order(new_order(1, vec![CartLine::new(a.id, 1)], Some("tx-dup")))
        .await
        .unwrap();
    let err = store
        .commit_order(new_order(1, vec![CartLine::new(a.id, 1)], Some("tx-dup")))
        .await
        .unwrap_err();

    assert!(err.is_duplicate_payment());
    assert_eq!(store.get_product(a.id).await.unwrap().unwrap().stock, 4);
}

#[tokio::test]
#[serial]
async fn test_concurrent_commits_never_oversell() {
    const BUYERS: i64 = 8;

    let store = get_test_store().await;
    let product = store
        .insert_product(NewProduct::new(7, "Limited", Money::from_units(10), BUYERS - 1))
        .await
        .unwrap();

    let handles: Vec<_> = (0..BUYERS)
        .map(|buyer| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .commit_order(new_order(buyer, vec![CartLine::new(product.id, 1)], None))
                    .await
            })
        })
        .collect();

    let results = futures_util::future::join_all(handles).await;
    let committed = results
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();

    assert_eq!(committed as i64, BUYERS - 1);
    assert_eq!(store.get_product(product.id).await.unwrap().unwrap().stock, 0);
}

#[tokio::test]
#[serial]
async fn test_status_transitions_and_seller_listing() {
    let store = get_test_store().await;
    let a = store
        .insert_product(NewProduct::new(7, "A", Money::from_units(10), 5))
        .await
        .unwrap();
    let order = store
        .commit_order(new_order(1, vec![CartLine::new(a.id, 1)], None))
        .await
        .unwrap();

    let err = store
        .transition_status(order.id, OrderStatus::Delivered)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid status transition from pending to delivered"
    );

    let confirmed = store
        .transition_status(order.id, OrderStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status, OrderStatus::Confirmed);

    assert_eq!(
        store.sellers_for_order(order.id).await.unwrap(),
        vec![UserId::new(7)]
    );
    assert_eq!(store.orders_for_seller(UserId::new(7)).await.unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn test_soft_delete_hides_order() {
    let store = get_test_store().await;
    let a = store
        .insert_product(NewProduct::new(7, "A", Money::from_units(10), 5))
        .await
        .unwrap();
    let order = store
        .commit_order(new_order(1, vec![CartLine::new(a.id, 1)], Some("tx-del")))
        .await
        .unwrap();

    store.soft_delete_order(order.id).await.unwrap();

    assert!(store.get_order(order.id).await.unwrap().is_none());
    assert!(store.find_by_payment_ref("tx-del").await.unwrap().is_none());
    assert!(matches!(
        store.soft_delete_order(order.id).await,
        Err(StoreError::Order(OrderError::OrderNotFound(_)))
    ));
}
