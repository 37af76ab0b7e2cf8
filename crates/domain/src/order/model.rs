//! Order records and the inputs used to create them.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::{OrderError, OrderStatus, PaymentMethod, PaymentStatus};

/// A catalog product as seen by order commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    /// The seller who listed the product.
    pub seller_id: UserId,
    pub name: String,
    /// Current list price. Only read at commit time.
    pub price: Money,
    pub stock: i64,
}

/// One requested line of a cart: a product and how many units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl CartLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Where the order ships to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingInfo {
    #[serde(rename = "shipping_address")]
    pub address: String,
    #[serde(rename = "shipping_city")]
    pub city: String,
    #[serde(rename = "shipping_state")]
    pub state: String,
    #[serde(rename = "shipping_zip", default)]
    pub zip: Option<String>,
    #[serde(rename = "shipping_phone")]
    pub phone: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ShippingInfo {
    /// Checks that the required fields are present.
    pub fn validate(&self) -> Result<(), OrderError> {
        let required = [
            ("shipping_address", &self.address),
            ("shipping_city", &self.city),
            ("shipping_state", &self.state),
            ("shipping_phone", &self.phone),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(OrderError::InvalidShipping(format!("{field} is required")));
            }
        }
        Ok(())
    }
}

/// Everything order commit needs to turn a cart into an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub shipping: ShippingInfo,
    pub payment_method: PaymentMethod,
    /// Reference assigned by the payment gateway, if any.
    pub payment_ref: Option<String>,
    pub lines: Vec<CartLine>,
    pub shipping_fee: Money,
}

impl NewOrder {
    /// Shape checks that need no catalog access: a non-empty cart with
    /// positive quantities.
    pub fn check_lines(&self) -> Result<(), OrderError> {
        if self.lines.is_empty() {
            return Err(OrderError::NoItems);
        }
        if let Some(line) = self.lines.iter().find(|line| line.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: line.product_id,
                quantity: line.quantity,
            });
        }
        Ok(())
    }
}

/// A line of a committed order with its price frozen at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

/// A committed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub payment_ref: Option<String>,
    #[serde(flatten)]
    pub shipping: ShippingInfo,
    pub subtotal: Money,
    pub shipping_fee: Money,
    pub total: Money,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Total number of units across all lines.
    pub fn total_items(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn contains_product(&self, product_id: ProductId) -> bool {
        self.items.iter().any(|item| item.product_id == product_id)
    }
}
