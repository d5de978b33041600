//! Immutable execution records.
//!
//! A [`Fill`] is never updated after creation; corrections come in as new
//! fills or as reconciliation events, so the audit trail stays append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::order::OrderSide;
use crate::domain::value_objects::{price::Price, quantity::Quantity};

/// Transaction costs attached to one execution.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TransactionCosts {
    pub brokerage: f64,
    pub exchange_fee: f64,
    pub tax: f64,
}

impl TransactionCosts {
    pub fn new(brokerage: f64, exchange_fee: f64, tax: f64) -> Self {
        Self {
            brokerage,
            exchange_fee,
            tax,
        }
    }

    pub fn total(&self) -> f64 {
        self.brokerage + self.exchange_fee + self.tax
    }
}

/// One execution against an order.
#[derive(Debug, Clone)]
pub struct Fill {
    pub order_id: String,
    pub venue_trade_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Quantity,
    pub price: Price,
    pub costs: TransactionCosts,
    /// Cash delta of this execution: negative for buys, positive for sells,
    /// net of total charges.
    pub net_cash_impact: f64,
    pub executed_at: DateTime<Utc>,
}

impl Fill {
    pub fn new(
        order_id: String,
        venue_trade_id: Option<String>,
        symbol: String,
        side: OrderSide,
        quantity: Quantity,
        price: Price,
        costs: TransactionCosts,
        executed_at: DateTime<Utc>,
    ) -> Self {
        let gross = price.value() * quantity.value() as f64;
        let net_cash_impact = match side {
            OrderSide::Buy => -gross - costs.total(),
            OrderSide::Sell => gross - costs.total(),
        };
        Fill {
            order_id,
            venue_trade_id,
            symbol,
            side,
            quantity,
            price,
            costs,
            net_cash_impact,
            executed_at,
        }
    }

    pub fn total_charges(&self) -> f64 {
        self.costs.total()
    }
}
