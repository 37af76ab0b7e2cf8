//! Checkout error types.

use domain::{OrderError, PaymentMethod};
use store::StoreError;
use thiserror::Error;

/// Errors raised by a payment gateway adapter.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway answered but refused the request.
    #[error("{gateway} rejected the payment request: {message}")]
    Rejected {
        gateway: PaymentMethod,
        message: String,
    },

    /// The gateway could not be reached or timed out.
    #[error("{gateway} request failed: {source}")]
    Transport {
        gateway: PaymentMethod,
        #[source]
        source: reqwest::Error,
    },

    /// The gateway answered with something we could not read.
    #[error("Malformed {gateway} response: {message}")]
    MalformedResponse {
        gateway: PaymentMethod,
        message: String,
    },

    /// A webhook failed signature verification.
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// The payment request is missing or has malformed fields.
    #[error("Invalid payment request: {0}")]
    InvalidRequest(String),
}

/// Errors that can occur while staging or settling a checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// A domain rule rejected the cart.
    #[error(transparent)]
    Order(#[from] OrderError),

    /// A pending order already uses this transaction reference.
    #[error("A pending order with reference {0} already exists")]
    DuplicateReference(String),

    /// No pending order is staged under this reference.
    #[error("No pending order found for reference {0}")]
    PendingNotFound(String),

    /// The requested gateway has no credentials configured.
    #[error("Payment gateway {0} is not configured")]
    GatewayUnavailable(PaymentMethod),

    /// The pending order was staged for a different gateway.
    #[error("Pending order {tx_ref} was staged for {staged}, not {requested}")]
    MethodMismatch {
        tx_ref: String,
        staged: PaymentMethod,
        requested: PaymentMethod,
    },

    /// A gateway call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The payment succeeded but the order could not be committed. The
    /// pending order has been restored.
    #[error("Order commit failed for {tx_ref}: {source}")]
    Commit {
        tx_ref: String,
        #[source]
        source: StoreError,
    },

    /// A store read failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CheckoutError {
    /// Returns the domain error behind this failure, if any.
    pub fn as_order_error(&self) -> Option<&OrderError> {
        match self {
            CheckoutError::Order(err) => Some(err),
            CheckoutError::Commit { source, .. } | CheckoutError::Store(source) => {
                source.as_order_error()
            }
            _ => None,
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
