//! Stock and price validation shared by every order-creating path.

use std::collections::HashMap;

use common::{Money, ProductId};

use super::{CartLine, OrderError, OrderItem, Product};

/// A cart priced against the catalog as it stood inside the commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub total: Money,
}

/// Validates `lines` against `products` and prices them.
///
/// Every product is checked for existence before any stock level is looked
/// at, so the first missing product in input order is always the one
/// reported. Stock is then checked line by line in input order; repeated
/// lines for the same product draw down the same remaining stock.
pub fn validate_lines(
    lines: &[CartLine],
    products: &HashMap<ProductId, Product>,
) -> Result<Vec<OrderItem>, OrderError> {
    if let Some(missing) = lines
        .iter()
        .find(|line| !products.contains_key(&line.product_id))
    {
        return Err(OrderError::ProductNotFound(missing.product_id));
    }

    let mut remaining: HashMap<ProductId, i64> = HashMap::new();
    let mut items = Vec::with_capacity(lines.len());

    for line in lines {
        let product = &products[&line.product_id];
        let available = remaining.entry(product.id).or_insert(product.stock);
        let requested = i64::from(line.quantity);

        if *available < requested {
            return Err(OrderError::InsufficientStock {
                product_id: product.id,
                product_name: product.name.clone(),
                available: *available,
                requested: line.quantity,
            });
        }
        *available -= requested;

        items.push(OrderItem {
            product_id: product.id,
            product_name: product.name.clone(),
            quantity: line.quantity,
            unit_price: product.price,
            line_total: product.price.multiply(line.quantity),
        });
    }

    Ok(items)
}

/// Validates and prices a cart, adding the shipping fee.
pub fn price_cart(
    lines: &[CartLine],
    products: &HashMap<ProductId, Product>,
    shipping_fee: Money,
) -> Result<PricedCart, OrderError> {
    let items = validate_lines(lines, products)?;
    let subtotal: Money = items.iter().map(|item| item.line_total).sum();

    Ok(PricedCart {
        items,
        subtotal,
        shipping_fee,
        total: subtotal + shipping_fee,
    })
}

#[cfg(test)]
mod tests {
    use common::UserId;

    use super::*;

    fn catalog() -> HashMap<ProductId, Product> {
        [
            (1, "Teff Injera", 5000, 5),
            (2, "Berbere", 3000, 1),
            (3, "Shiro", 2000, 0),
        ]
        .into_iter()
        .map(|(id, name, price, stock)| {
            let id = ProductId::new(id);
            (
                id,
                Product {
                    id,
                    seller_id: UserId::new(100),
                    name: name.to_string(),
                    price: Money::from_cents(price),
                    stock,
                },
            )
        })
        .collect()
    }

    #[test]
    fn prices_lines_at_current_catalog_price() {
        let priced = price_cart(
            &[CartLine::new(1, 2), CartLine::new(2, 1)],
            &catalog(),
            Money::zero(),
        )
        .unwrap();

        assert_eq!(priced.items.len(), 2);
        assert_eq!(priced.items[0].line_total, Money::from_cents(10000));
        assert_eq!(priced.subtotal, Money::from_cents(13000));
        assert_eq!(priced.total, priced.subtotal);
    }

    #[test]
    fn total_includes_shipping_fee() {
        let priced =
            price_cart(&[CartLine::new(1, 1)], &catalog(), Money::from_cents(250)).unwrap();
        assert_eq!(priced.total, Money::from_cents(5250));
        assert_eq!(
            priced.items.iter().map(|i| i.line_total).sum::<Money>(),
            priced.subtotal
        );
    }

    #[test]
    fn missing_products_are_reported_before_stock_problems() {
        // Line 1 has a stock problem, line 2 is missing: the missing product wins.
        let err = validate_lines(&[CartLine::new(3, 1), CartLine::new(99, 1)], &catalog())
            .unwrap_err();
        assert!(matches!(err, OrderError::ProductNotFound(id) if id == ProductId::new(99)));
    }

    #[test]
    fn first_missing_product_in_input_order_is_reported() {
        let err = validate_lines(
            &[CartLine::new(1, 1), CartLine::new(77, 1), CartLine::new(88, 1)],
            &catalog(),
        )
        .unwrap_err();
        assert!(matches!(err, OrderError::ProductNotFound(id) if id == ProductId::new(77)));
    }

    #[test]
    fn insufficient_stock_reports_available_and_requested() {
        let err = validate_lines(&[CartLine::new(1, 1), CartLine::new(2, 3)], &catalog())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product Berbere. Available: 1, Requested: 3"
        );
    }

    #[test]
    fn repeated_lines_share_remaining_stock() {
        let err = validate_lines(&[CartLine::new(1, 3), CartLine::new(1, 3)], &catalog())
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::InsufficientStock {
                available: 2,
                requested: 3,
                ..
            }
        ));
    }
}
