//! Position and lot records, owned exclusively by the position ledger.
//!
//! Lots form a FIFO queue per symbol. `remaining_quantity` is signed
//! (positive lots back a long position, negative lots a short one) so the
//! ledger invariant `position.quantity == sum(lot.remaining_quantity)` is
//! directly checkable.

use chrono::{DateTime, Utc};

use crate::domain::value_objects::price::Price;

/// One opening execution still contributing to a position.
#[derive(Debug, Clone)]
pub struct Lot {
    /// Signed quantity at entry (positive long, negative short).
    pub entry_quantity: i64,
    /// Signed quantity not yet closed out. Same sign as `entry_quantity`.
    pub remaining_quantity: i64,
    pub entry_price: f64,
    pub entry_at: DateTime<Utc>,
}

impl Lot {
    pub fn new(quantity: i64, entry_price: f64, entry_at: DateTime<Utc>) -> Self {
        Lot {
            entry_quantity: quantity,
            remaining_quantity: quantity,
            entry_price,
            entry_at,
        }
    }
}

/// Aggregate view over the open lots of one symbol.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub venue: String,
    /// Signed quantity: positive = long, negative = short, zero = closed.
    pub quantity: i64,
    /// Volume-weighted average price of currently open lots.
    pub average_price: f64,
    /// Accumulated on closing fills only; never recomputed from market data.
    pub realized_pnl: f64,
    /// Recomputed from the last known price; not ground truth.
    pub unrealized_pnl: f64,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn open(symbol: String, venue: String, opened_at: DateTime<Utc>) -> Self {
        Position {
            symbol,
            venue,
            quantity: 0,
            average_price: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            stop_loss: None,
            take_profit: None,
            opened_at,
            closed_at: None,
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    /// Whether `last_price` breaches the position-level stop-loss.
    pub fn stop_loss_breached(&self, last_price: Price) -> bool {
        match self.stop_loss {
            Some(stop) if self.is_long() => last_price.value() <= stop.value(),
            Some(stop) if self.is_short() => last_price.value() >= stop.value(),
            _ => false,
        }
    }

    /// Whether `last_price` has reached the position-level take-profit.
    pub fn take_profit_reached(&self, last_price: Price) -> bool {
        match self.take_profit {
            Some(tp) if self.is_long() => last_price.value() >= tp.value(),
            Some(tp) if self.is_short() => last_price.value() <= tp.value(),
            _ => false,
        }
    }
}
