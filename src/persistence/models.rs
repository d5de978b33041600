//! String mappings between domain enums and their database columns.

use crate::domain::entities::order::{OrderKind, OrderSide, OrderStatus, Product, TimeInForce};
use crate::persistence::DatabaseError;

pub fn side_to_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    }
}

pub fn parse_side(s: &str) -> Result<OrderSide, DatabaseError> {
    match s {
        "BUY" => Ok(OrderSide::Buy),
        "SELL" => Ok(OrderSide::Sell),
        other => Err(DatabaseError::QueryError(format!(
            "unknown order side '{}'",
            other
        ))),
    }
}

pub fn kind_to_str(kind: OrderKind) -> &'static str {
    match kind {
        OrderKind::Market => "MARKET",
        OrderKind::Limit => "LIMIT",
        OrderKind::Stop => "STOP",
        OrderKind::StopLimit => "STOP_LIMIT",
    }
}

pub fn parse_kind(s: &str) -> Result<OrderKind, DatabaseError> {
    match s {
        "MARKET" => Ok(OrderKind::Market),
        "LIMIT" => Ok(OrderKind::Limit),
        "STOP" => Ok(OrderKind::Stop),
        "STOP_LIMIT" => Ok(OrderKind::StopLimit),
        other => Err(DatabaseError::QueryError(format!(
            "unknown order kind '{}'",
            other
        ))),
    }
}

pub fn product_to_str(product: Product) -> &'static str {
    match product {
        Product::Intraday => "INTRADAY",
        Product::Delivery => "DELIVERY",
    }
}

pub fn parse_product(s: &str) -> Result<Product, DatabaseError> {
    match s {
        "INTRADAY" => Ok(Product::Intraday),
        "DELIVERY" => Ok(Product::Delivery),
        other => Err(DatabaseError::QueryError(format!(
            "unknown product '{}'",
            other
        ))),
    }
}

pub fn tif_to_str(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Day => "DAY",
        TimeInForce::ImmediateOrCancel => "IOC",
    }
}

pub fn parse_tif(s: &str) -> Result<TimeInForce, DatabaseError> {
    match s {
        "DAY" => Ok(TimeInForce::Day),
        "IOC" => Ok(TimeInForce::ImmediateOrCancel),
        other => Err(DatabaseError::QueryError(format!(
            "unknown time-in-force '{}'",
            other
        ))),
    }
}

pub fn status_to_str(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "PENDING",
        OrderStatus::Submitted => "SUBMITTED",
        OrderStatus::Open => "OPEN",
        OrderStatus::Filled => "FILLED",
        OrderStatus::Cancelled => "CANCELLED",
        OrderStatus::Rejected => "REJECTED",
        OrderStatus::Failed => "FAILED",
    }
}

pub fn parse_status(s: &str) -> Result<OrderStatus, DatabaseError> {
    match s {
        "PENDING" => Ok(OrderStatus::Pending),
        "SUBMITTED" => Ok(OrderStatus::Submitted),
        "OPEN" => Ok(OrderStatus::Open),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELLED" => Ok(OrderStatus::Cancelled),
        "REJECTED" => Ok(OrderStatus::Rejected),
        "FAILED" => Ok(OrderStatus::Failed),
        other => Err(DatabaseError::QueryError(format!(
            "unknown order status '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Submitted,
            OrderStatus::Open,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
            OrderStatus::Failed,
        ] {
            assert_eq!(parse_status(status_to_str(status)).unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_an_error() {
        assert!(parse_status("EXPIRED").is_err());
    }
}
