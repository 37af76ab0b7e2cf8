use domain::{OrderError, PaymentMethod};
use thiserror::Error;

/// Errors that can occur when reading or writing orders.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A domain rule rejected the operation. Nothing was written.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// The gateway payment is already recorded on another order.
    #[error("Payment {payment_ref} via {method} is already recorded on an order")]
    DuplicatePayment {
        method: PaymentMethod,
        payment_ref: String,
    },

    /// No unused order number could be produced.
    #[error("Could not allocate a unique order number after {0} attempts")]
    OrderNumberExhausted(u32),

    /// A stored value could not be mapped back onto the domain model.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// The backing store refused the write.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns the domain error if this is a rule violation.
    pub fn as_order_error(&self) -> Option<&OrderError> {
        match self {
            StoreError::Order(err) => Some(err),
            _ => None,
        }
    }

    /// True when the payment was already turned into an order.
    pub fn is_duplicate_payment(&self) -> bool {
        matches!(self, StoreError::DuplicatePayment { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
