//! Order entity and its lifecycle state machine.
//!
//! Status is a closed enumeration with an explicit transition table: every
//! move goes through [`Order::transition_to`], which rejects anything the
//! table does not allow. Fills only ever increase `filled_quantity`, and a
//! FILLED order always has `filled_quantity == quantity`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::OrderError;
use crate::domain::value_objects::{price::Price, quantity::Quantity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Signed direction applied to position quantity: +1 for Buy, -1 for Sell.
    pub fn direction(&self) -> i64 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderKind::Market => write!(f, "MARKET"),
            OrderKind::Limit => write!(f, "LIMIT"),
            OrderKind::Stop => write!(f, "STOP"),
            OrderKind::StopLimit => write!(f, "STOP_LIMIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Product {
    Intraday,
    Delivery,
}

impl std::fmt::Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Product::Intraday => write!(f, "INTRADAY"),
            Product::Delivery => write!(f, "DELIVERY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Day,
    ImmediateOrCancel,
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeInForce::Day => write!(f, "DAY"),
            TimeInForce::ImmediateOrCancel => write!(f, "IOC"),
        }
    }
}

/// Order lifecycle status.
///
/// PENDING -> SUBMITTED -> OPEN -> FILLED is the success path; CANCELLED,
/// REJECTED and FAILED are terminal non-success statuses reachable per the
/// transition table below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    Open,
    Filled,
    Cancelled,
    Rejected,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Failed
        )
    }

    /// Transition table for the lifecycle state machine.
    ///
    /// CANCELLED is only reachable from SUBMITTED/OPEN; FAILED only from
    /// PENDING (venue submission errored); REJECTED only from PENDING
    /// (validator failure recorded for audit symmetry, or the final halt
    /// gate). Terminal statuses allow no further transitions.
    pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (from, to),
            (Pending, Submitted)
                | (Pending, Rejected)
                | (Pending, Failed)
                | (Submitted, Open)
                | (Submitted, Filled)
                | (Submitted, Cancelled)
                | (Submitted, Rejected)
                | (Open, Filled)
                | (Open, Cancelled)
                | (Open, Rejected)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::Submitted => write!(f, "SUBMITTED"),
            OrderStatus::Open => write!(f, "OPEN"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
            OrderStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Pre-trade checks, in the order the validator runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskCheck {
    Balance,
    PositionCount,
    StopLoss,
    RiskPerTrade,
    DailyLoss,
    RiskReward,
    PriceSanity,
    QuantityLimits,
    OrderTradeRatio,
    Tradability,
}

impl std::fmt::Display for RiskCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RiskCheck::Balance => "balance",
            RiskCheck::PositionCount => "position-count",
            RiskCheck::StopLoss => "stop-loss",
            RiskCheck::RiskPerTrade => "risk-per-trade",
            RiskCheck::DailyLoss => "daily-loss",
            RiskCheck::RiskReward => "risk-reward",
            RiskCheck::PriceSanity => "price-sanity",
            RiskCheck::QuantityLimits => "quantity-limits",
            RiskCheck::OrderTradeRatio => "order-trade-ratio",
            RiskCheck::Tradability => "tradability",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a validation pass, attached to the order record for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub failed_check: Option<RiskCheck>,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    pub fn accepted(warnings: Vec<String>) -> Self {
        Self {
            valid: true,
            failed_check: None,
            reason: None,
            warnings,
        }
    }

    pub fn rejected(check: RiskCheck, reason: String, warnings: Vec<String>) -> Self {
        Self {
            valid: false,
            failed_check: Some(check),
            reason: Some(reason),
            warnings,
        }
    }
}

/// Incoming order request from the strategy layer.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub venue: String,
    pub side: OrderSide,
    pub quantity: Quantity,
    pub kind: OrderKind,
    pub limit_price: Option<Price>,
    pub trigger_price: Option<Price>,
    pub product: Product,
    pub time_in_force: TimeInForce,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
}

/// A single order, tracked from creation to a terminal status.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub venue_order_id: Option<String>,
    pub symbol: String,
    pub venue: String,
    pub side: OrderSide,
    pub quantity: Quantity,
    pub kind: OrderKind,
    pub limit_price: Option<Price>,
    pub trigger_price: Option<Price>,
    pub product: Product,
    pub time_in_force: TimeInForce,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub risk_amount: Option<f64>,
    pub risk_reward: Option<f64>,
    pub status: OrderStatus,
    pub filled_quantity: i64,
    pub average_fill_price: Option<Price>,
    pub validation: Option<ValidationOutcome>,
    pub error_detail: Option<String>,
    /// Free-form origin tag, e.g. "strategy", "risk_stop_loss", "kill_switch".
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn from_request(id: String, request: &OrderRequest) -> Self {
        let now = Utc::now();
        Order {
            id,
            venue_order_id: None,
            symbol: request.symbol.clone(),
            venue: request.venue.clone(),
            side: request.side,
            quantity: request.quantity,
            kind: request.kind,
            limit_price: request.limit_price,
            trigger_price: request.trigger_price,
            product: request.product,
            time_in_force: request.time_in_force,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            risk_amount: None,
            risk_reward: None,
            status: OrderStatus::Pending,
            filled_quantity: 0,
            average_fill_price: None,
            validation: None,
            error_detail: None,
            note: None,
            created_at: now,
            submitted_at: None,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn remaining_quantity(&self) -> i64 {
        self.quantity.value() - self.filled_quantity
    }

    /// Move the order to a new status, enforcing the transition table.
    pub fn transition_to(&mut self, to: OrderStatus) -> Result<(), OrderError> {
        if self.status == to {
            return Ok(());
        }
        if self.is_terminal() {
            return Err(OrderError::AlreadyTerminal {
                id: self.id.clone(),
                status: self.status,
            });
        }
        if !OrderStatus::can_transition(self.status, to) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        match to {
            OrderStatus::Submitted => self.submitted_at = Some(self.updated_at),
            _ if to.is_terminal() => self.completed_at = Some(self.updated_at),
            _ => {}
        }
        Ok(())
    }

    /// Apply an execution of `fill_quantity` units at `fill_price`.
    ///
    /// Keeps the running weighted-mean average fill price and moves the
    /// order to FILLED exactly when the full quantity has executed.
    pub fn record_fill(&mut self, fill_quantity: i64, fill_price: Price) -> Result<(), OrderError> {
        let remaining = self.remaining_quantity();
        if fill_quantity <= 0 || fill_quantity > remaining {
            return Err(OrderError::OverFill {
                id: self.id.clone(),
                fill_quantity,
                remaining,
            });
        }
        let prev_filled = self.filled_quantity as f64;
        let prev_avg = self.average_fill_price.map(|p| p.value()).unwrap_or(0.0);
        let new_filled = prev_filled + fill_quantity as f64;
        let new_avg = (prev_avg * prev_filled + fill_price.value() * fill_quantity as f64)
            / new_filled;

        self.filled_quantity += fill_quantity;
        // new_avg is a convex combination of valid prices
        self.average_fill_price = Price::new(new_avg).ok();
        self.updated_at = Utc::now();

        if self.filled_quantity == self.quantity.value() {
            self.transition_to(OrderStatus::Filled)?;
        } else if self.status == OrderStatus::Submitted {
            self.transition_to(OrderStatus::Open)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(side: OrderSide, qty: i64) -> OrderRequest {
        OrderRequest {
            symbol: "RELIANCE".to_string(),
            venue: "NSE".to_string(),
            side,
            quantity: Quantity::new(qty).unwrap(),
            kind: OrderKind::Limit,
            limit_price: Some(Price::new(2450.0).unwrap()),
            trigger_price: None,
            product: Product::Intraday,
            time_in_force: TimeInForce::Day,
            stop_loss: Some(Price::new(2430.0).unwrap()),
            take_profit: Some(Price::new(2491.0).unwrap()),
        }
    }

    #[test]
    fn test_success_path_transitions() {
        let mut order = Order::from_request("ord_1".to_string(), &request(OrderSide::Buy, 100));
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.transition_to(OrderStatus::Submitted).is_ok());
        assert!(order.transition_to(OrderStatus::Open).is_ok());
        assert!(order.transition_to(OrderStatus::Filled).is_ok());
        assert!(order.is_terminal());
        assert!(order.completed_at.is_some());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut order = Order::from_request("ord_2".to_string(), &request(OrderSide::Buy, 100));
        let err = order.transition_to(OrderStatus::Open).unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { .. }));
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[test]
    fn test_terminal_is_sticky() {
        let mut order = Order::from_request("ord_3".to_string(), &request(OrderSide::Sell, 10));
        order.transition_to(OrderStatus::Submitted).unwrap();
        order.transition_to(OrderStatus::Cancelled).unwrap();
        let err = order.transition_to(OrderStatus::Filled).unwrap_err();
        assert!(matches!(err, OrderError::AlreadyTerminal { .. }));
    }

    #[test]
    fn test_cancel_only_from_submitted_or_open() {
        assert!(!OrderStatus::can_transition(
            OrderStatus::Pending,
            OrderStatus::Cancelled
        ));
        assert!(OrderStatus::can_transition(
            OrderStatus::Submitted,
            OrderStatus::Cancelled
        ));
        assert!(OrderStatus::can_transition(
            OrderStatus::Open,
            OrderStatus::Cancelled
        ));
        assert!(!OrderStatus::can_transition(
            OrderStatus::Filled,
            OrderStatus::Cancelled
        ));
    }

    #[test]
    fn test_partial_fills_keep_order_open() {
        let mut order = Order::from_request("ord_4".to_string(), &request(OrderSide::Buy, 100));
        order.transition_to(OrderStatus::Submitted).unwrap();

        order.record_fill(40, Price::new(2450.0).unwrap()).unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.filled_quantity, 40);

        order.record_fill(60, Price::new(2460.0).unwrap()).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_quantity, order.quantity.value());

        // weighted mean: (2450*40 + 2460*60) / 100 = 2456
        let avg = order.average_fill_price.unwrap().value();
        assert!((avg - 2456.0).abs() < 1e-9);
    }

    #[test]
    fn test_overfill_rejected() {
        let mut order = Order::from_request("ord_5".to_string(), &request(OrderSide::Buy, 100));
        order.transition_to(OrderStatus::Submitted).unwrap();
        order.record_fill(90, Price::new(2450.0).unwrap()).unwrap();
        let err = order.record_fill(20, Price::new(2450.0).unwrap()).unwrap_err();
        assert!(matches!(err, OrderError::OverFill { remaining: 10, .. }));
        assert_eq!(order.filled_quantity, 90);
    }
}
