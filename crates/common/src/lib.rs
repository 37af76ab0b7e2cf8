//! Shared types for the marketplace backend.

mod ids;
mod money;

pub use ids::{OrderId, ProductId, UserId};
pub use money::Money;
