//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::{CheckoutError, GatewayError};
use domain::OrderError;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Missing or invalid caller identity.
    Unauthorized(String),
    /// The caller may not perform this action.
    Forbidden(String),
    /// The request conflicts with current state.
    Conflict(String),
    /// A required backend is not configured or not reachable.
    ServiceUnavailable(String),
    /// A payment gateway failed or refused the request.
    BadGateway(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::BadGateway(msg) => {
                tracing::warn!(error = %msg, "payment gateway error");
                (StatusCode::BAD_GATEWAY, msg)
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        let message = err.to_string();
        match err {
            OrderError::NoItems
            | OrderError::InvalidQuantity { .. }
            | OrderError::InvalidShipping(_)
            | OrderError::UnknownStatus(_)
            | OrderError::UnknownPaymentMethod(_) => ApiError::BadRequest(message),
            OrderError::ProductNotFound(_) | OrderError::OrderNotFound(_) => {
                ApiError::NotFound(message)
            }
            OrderError::InsufficientStock { .. } | OrderError::InvalidTransition { .. } => {
                ApiError::Conflict(message)
            }
            OrderError::Forbidden(_) => ApiError::Forbidden(message),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Order(order_err) => order_err.into(),
            StoreError::DuplicatePayment { .. } => ApiError::Conflict(err.to_string()),
            StoreError::Unavailable(_) => ApiError::ServiceUnavailable(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidSignature(_) | GatewayError::InvalidRequest(_) => {
                ApiError::BadRequest(err.to_string())
            }
            GatewayError::Rejected { .. }
            | GatewayError::Transport { .. }
            | GatewayError::MalformedResponse { .. } => ApiError::BadGateway(err.to_string()),
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Order(order_err) => order_err.into(),
            CheckoutError::DuplicateReference(_) => ApiError::Conflict(err.to_string()),
            CheckoutError::PendingNotFound(_) => ApiError::NotFound(err.to_string()),
            CheckoutError::GatewayUnavailable(_) => ApiError::ServiceUnavailable(err.to_string()),
            CheckoutError::MethodMismatch { .. } => ApiError::BadRequest(err.to_string()),
            CheckoutError::Gateway(gateway_err) => gateway_err.into(),
            CheckoutError::Commit { source, .. } | CheckoutError::Store(source) => source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use domain::{OrderStatus, PaymentMethod, ProductId};

    use super::*;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_order_errors_map_to_status_codes() {
        assert_eq!(status_of(OrderError::NoItems), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(OrderError::ProductNotFound(ProductId::new(9))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(OrderError::InsufficientStock {
                product_id: ProductId::new(1),
                product_name: "Coffee".to_string(),
                available: 1,
                requested: 2,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(OrderError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Delivered,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(OrderError::Forbidden("not your order".to_string())),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_checkout_errors_map_to_status_codes() {
        assert_eq!(
            status_of(CheckoutError::DuplicateReference("tx-1".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(CheckoutError::PendingNotFound("tx-1".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(CheckoutError::GatewayUnavailable(PaymentMethod::Stripe)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(GatewayError::InvalidSignature("stale".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(GatewayError::Rejected {
                gateway: PaymentMethod::Chapa,
                message: "invalid key".to_string(),
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_commit_failure_maps_through_store_error() {
        let err = CheckoutError::Commit {
            tx_ref: "tx-1".to_string(),
            source: StoreError::Order(OrderError::NoItems),
        };
        assert_eq!(status_of(err), StatusCode::BAD_REQUEST);

        let err = CheckoutError::Commit {
            tx_ref: "tx-1".to_string(),
            source: StoreError::Unavailable("disk full".to_string()),
        };
        assert_eq!(status_of(err), StatusCode::SERVICE_UNAVAILABLE);
    }
}
