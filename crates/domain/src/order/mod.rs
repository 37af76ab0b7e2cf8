//! Orders: records, fulfillment state machine, validation and numbering.

mod model;
mod number;
mod payment;
mod status;
mod validation;

pub use model::{CartLine, NewOrder, Order, OrderItem, Product, ShippingInfo};
pub use number::OrderNumberGenerator;
pub use payment::{PaymentMethod, PaymentStatus};
pub use status::OrderStatus;
pub use validation::{PricedCart, price_cart, validate_lines};

use common::{OrderId, ProductId};
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The cart has no lines.
    #[error("Order has no items")]
    NoItems,

    /// A line asked for zero units.
    #[error("Invalid quantity {quantity} for product {product_id} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// Shipping details are incomplete.
    #[error("Invalid shipping information: {0}")]
    InvalidShipping(String),

    /// A referenced product does not exist.
    #[error("Product with ID {0} not found")]
    ProductNotFound(ProductId),

    /// A line asks for more units than are in stock.
    #[error(
        "Insufficient stock for product {product_name}. Available: {available}, Requested: {requested}"
    )]
    InsufficientStock {
        product_id: ProductId,
        product_name: String,
        available: i64,
        requested: u32,
    },

    /// The order does not exist or is not visible to the caller.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The requested status change is not in the transition table.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The caller may not change this order.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Unrecognized status string.
    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    /// Unrecognized payment method string.
    #[error("Unknown payment method: {0} (expected chapa or stripe)")]
    UnknownPaymentMethod(String),
}
