//! Domain layer for the marketplace backend.
//!
//! This crate provides the order model and its rules:
//! - order, item, product and shipping records
//! - the fulfillment status state machine
//! - stock and price validation shared by every commit path
//! - unique order number generation

pub mod actor;
pub mod order;

pub use actor::{Actor, Role};
pub use common::{Money, OrderId, ProductId, UserId};
pub use order::{
    CartLine, NewOrder, Order, OrderError, OrderItem, OrderNumberGenerator, OrderStatus,
    PaymentMethod, PaymentStatus, PricedCart, Product, ShippingInfo, price_cart, validate_lines,
};
