//! Order commit behaviour against the in-memory store.

use std::sync::Arc;

use domain::{CartLine, Money, NewOrder, OrderError, PaymentMethod, ShippingInfo, UserId};
use store::{InMemoryOrderStore, NewProduct, OrderStore, StoreError};

fn shipping() -> ShippingInfo {
    ShippingInfo {
        address: "Bole Road 12".to_string(),
        city: "Addis Ababa".to_string(),
        state: "Addis Ababa".to_string(),
        zip: Some("1000".to_string()),
        phone: "0912345678".to_string(),
        notes: None,
    }
}

fn new_order(user: i64, lines: Vec<CartLine>) -> NewOrder {
    NewOrder {
        user_id: UserId::new(user),
        shipping: shipping(),
        payment_method: PaymentMethod::Chapa,
        payment_ref: None,
        lines,
        shipping_fee: Money::zero(),
    }
}

#[tokio::test]
async fn test_two_line_cart_totals_and_stock() {
    let store = InMemoryOrderStore::new();
    let a = store
        .insert_product(NewProduct::new(7, "A", Money::from_units(50), 5))
        .await
        .unwrap();
    let b = store
        .insert_product(NewProduct::new(7, "B", Money::from_units(30), 1))
        .await
        .unwrap();

    let order = store
        .commit_order(new_order(1, vec![CartLine::new(a.id, 2), CartLine::new(b.id, 1)]))
        .await
        .unwrap();

    assert_eq!(order.subtotal, Money::from_units(130));
    assert_eq!(order.total, Money::from_units(130));
    assert_eq!(order.total_items(), 3);
    assert_eq!(store.stock_of(a.id).await, Some(3));
    assert_eq!(store.stock_of(b.id).await, Some(0));

    let again = store
        .commit_order(new_order(2, vec![CartLine::new(b.id, 1)]))
        .await
        .unwrap_err();
    assert!(matches!(
        again,
        StoreError::Order(OrderError::InsufficientStock {
            available: 0,
            requested: 1,
            ..
        })
    ));
}

#[tokio::test]
async fn test_price_is_captured_at_commit() {
    let store = InMemoryOrderStore::new();
    let a = store
        .insert_product(NewProduct::new(7, "A", Money::from_cents(1999), 10))
        .await
        .unwrap();

    let order = store
        .commit_order(new_order(1, vec![CartLine::new(a.id, 3)]))
        .await
        .unwrap();

    let item = &order.items[0];
    assert_eq!(item.unit_price, Money::from_cents(1999));
    assert_eq!(item.line_total, Money::from_cents(5997));
    assert_eq!(item.product_name, "A");
}

#[tokio::test]
async fn test_missing_product_fails_without_side_effects() {
    let store = InMemoryOrderStore::new();
    let a = store
        .insert_product(NewProduct::new(7, "A", Money::from_units(5), 2))
        .await
        .unwrap();

    let err = store
        .commit_order(new_order(
            1,
            vec![CartLine::new(a.id, 1), CartLine::new(999, 1)],
        ))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Product with ID 999 not found");
    assert_eq!(store.stock_of(a.id).await, Some(2));
    assert_eq!(store.order_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_never_oversell() {
    const BUYERS: i64 = 16;

    let store = Arc::new(InMemoryOrderStore::new());
    let product = store
        .insert_product(NewProduct::new(7, "Limited", Money::from_units(10), BUYERS - 1))
        .await
        .unwrap();

    let handles: Vec<_> = (0..BUYERS)
        .map(|buyer| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .commit_order(new_order(buyer, vec![CartLine::new(product.id, 1)]))
                    .await
            })
        })
        .collect();

    let mut committed = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => committed += 1,
            Err(StoreError::Order(OrderError::InsufficientStock { .. })) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(committed, BUYERS - 1);
    assert_eq!(rejected, 1);
    assert_eq!(store.stock_of(product.id).await, Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_committed_quantities_plus_stock_equal_initial_stock() {
    let store = Arc::new(InMemoryOrderStore::new());
    let product = store
        .insert_product(NewProduct::new(7, "Bulk", Money::from_units(1), 40))
        .await
        .unwrap();

    let handles: Vec<_> = (0..20)
        .map(|buyer| {
            let store = store.clone();
            tokio::spawn(async move {
                let quantity = (buyer % 4 + 1) as u32;
                store
                    .commit_order(new_order(buyer, vec![CartLine::new(product.id, quantity)]))
                    .await
            })
        })
        .collect();

    let mut sold: i64 = 0;
    for handle in handles {
        if let Ok(order) = handle.await.unwrap() {
            sold += i64::from(order.total_items());
        }
    }

    let remaining = store.stock_of(product.id).await.unwrap();
    assert!(remaining >= 0);
    assert_eq!(sold + remaining, 40);
}

#[tokio::test]
async fn test_order_numbers_are_unique() {
    let store = InMemoryOrderStore::new();
    let product = store
        .insert_product(NewProduct::new(7, "A", Money::from_units(1), 1000))
        .await
        .unwrap();

    let mut numbers = std::collections::HashSet::new();
    for buyer in 0..200 {
        let order = store
            .commit_order(new_order(buyer, vec![CartLine::new(product.id, 1)]))
            .await
            .unwrap();
        assert!(numbers.insert(order.order_number));
    }
}
