//! Order and inventory persistence.
//!
//! [`OrderStore`] is the storage seam. [`InMemoryOrderStore`] backs tests and
//! local runs; [`PostgresOrderStore`] is the durable implementation with
//! row-locked order commit. [`OrderService`] layers authorization, shipping
//! policy and metrics on top of either.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod service;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use service::{OrderService, PlaceOrder};
pub use store::{NewProduct, OrderStore};
