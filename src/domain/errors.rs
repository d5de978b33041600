use thiserror::Error;

use crate::domain::entities::order::{OrderStatus, RiskCheck};
use crate::domain::repositories::broker_gateway::GatewayError;

/// Errors produced by value-object constructors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Value must be non-negative")]
    MustBeNonNegative,

    #[error("Value must be finite")]
    MustBeFinite,

    #[error("Quantity must be a positive whole number")]
    NonPositiveQuantity,
}

/// Errors surfaced by the order lifecycle manager.
///
/// `Rejected` is non-retryable by the core: the caller decides whether to
/// alter the request and resubmit. `SubmissionFailed` means the venue call
/// itself errored after validation passed; the order is terminal FAILED and
/// the caller decides whether to place a fresh order.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order rejected by {check} check: {reason}")]
    Rejected { check: RiskCheck, reason: String },

    #[error("trading halted: {0}")]
    TradingHalted(String),

    #[error("venue call failed: {0}")]
    SubmissionFailed(#[from] GatewayError),

    #[error("unknown order: {0}")]
    UnknownOrder(String),

    #[error("no open position for {0}")]
    NoOpenPosition(String),

    #[error("illegal order status transition {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("order {id} is already terminal ({status})")]
    AlreadyTerminal { id: String, status: OrderStatus },

    #[error("order {id} cannot be cancelled from status {status}")]
    NotCancellable { id: String, status: OrderStatus },

    #[error("fill of {fill_quantity} exceeds open quantity {remaining} on order {id}")]
    OverFill {
        id: String,
        fill_quantity: i64,
        remaining: i64,
    },

    #[error("invalid order request: {0}")]
    InvalidRequest(#[from] ValidationError),

    #[error("persistence error: {0}")]
    Store(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        assert_eq!(
            ValidationError::NonPositiveQuantity.to_string(),
            "Quantity must be a positive whole number"
        );
    }

    #[test]
    fn test_order_error_display() {
        let err = OrderError::AlreadyTerminal {
            id: "ord_1".to_string(),
            status: OrderStatus::Filled,
        };
        assert_eq!(err.to_string(), "order ord_1 is already terminal (FILLED)");
    }
}
