//! Checkout and payment settlement.
//!
//! The flow is: a buyer's cart is staged in a [`PendingOrderStore`] under a
//! fresh transaction reference, the buyer pays through one of the registered
//! [`PaymentGateway`]s, and the gateway's callback or webhook is normalized
//! into a [`Settlement`] that the [`SettlementCoordinator`] reconciles with
//! the staged cart and the order store.

pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod pending;

pub use coordinator::{
    CallbackResult, CheckoutRequest, SettlementCoordinator, SettlementOutcome, StagedCheckout,
};
pub use error::{CheckoutError, GatewayError, Result};
pub use gateway::{
    CallbackOutcome, CallbackPayload, ChapaConfig, ChapaGateway, Customer, GatewayRegistry,
    PaymentGateway, PaymentHandle, PaymentRequest, Settlement, StripeConfig, StripeGateway,
    sign_payload,
};
pub use notify::{LogNotifier, Notification, NotificationQueue, Notifier};
pub use pending::{InMemoryPendingOrderStore, PendingOrder, PendingOrderStore, spawn_sweeper};
