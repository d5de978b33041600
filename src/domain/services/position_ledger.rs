//! Position ledger with FIFO lot matching.
//!
//! The ledger exclusively owns lots and positions. Mutations are atomic
//! single operations under one lock; callers never read-modify-write across
//! two calls. Each `apply_fill` processes one fill record completely,
//! including a close-then-reopen reversal, inside the same critical
//! section, so concurrent readers only ever observe fully-applied fills.

use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::domain::entities::fill::Fill;
use crate::domain::entities::position::{Lot, Position};
use crate::domain::value_objects::price::Price;

/// Result of applying one fill.
#[derive(Debug, Clone)]
pub struct FillApplication {
    pub symbol: String,
    /// Realized P&L delta from this fill, net of its transaction costs.
    pub realized_delta: f64,
    /// Signed position quantity after the fill.
    pub position_quantity: i64,
    /// True when this fill took the position to exactly zero.
    pub closed: bool,
    /// True when this fill opened a position on a previously flat symbol.
    pub opened: bool,
    /// Final realized P&L of the position if it closed.
    pub final_realized_pnl: Option<f64>,
}

struct Book {
    lots: VecDeque<Lot>,
    position: Position,
}

impl Book {
    fn lot_sum(&self) -> i64 {
        self.lots.iter().map(|l| l.remaining_quantity).sum()
    }

    fn recompute_average(&mut self) {
        let total: i64 = self.lots.iter().map(|l| l.remaining_quantity.abs()).sum();
        if total == 0 {
            self.position.average_price = 0.0;
            return;
        }
        let weighted: f64 = self
            .lots
            .iter()
            .map(|l| l.entry_price * l.remaining_quantity.abs() as f64)
            .sum();
        self.position.average_price = weighted / total as f64;
    }
}

struct DailyRealized {
    date: NaiveDate,
    today: f64,
    cumulative: f64,
}

/// Authoritative internal view of open positions.
pub struct PositionLedger {
    venue: String,
    books: Mutex<HashMap<String, Book>>,
    realized: Mutex<DailyRealized>,
}

impl PositionLedger {
    pub fn new(venue: String) -> Self {
        PositionLedger {
            venue,
            books: Mutex::new(HashMap::new()),
            realized: Mutex::new(DailyRealized {
                date: Utc::now().date_naive(),
                today: 0.0,
                cumulative: 0.0,
            }),
        }
    }

    /// Apply one fill: open a lot in the fill's direction, or consume lots
    /// oldest-first when the fill closes against the position. A fill larger
    /// than all open lots closes the position and reopens the remainder in
    /// the opposite direction.
    pub fn apply_fill(&self, fill: &Fill) -> FillApplication {
        let mut books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        let book = books.entry(fill.symbol.clone()).or_insert_with(|| Book {
            lots: VecDeque::new(),
            position: Position::open(fill.symbol.clone(), self.venue.clone(), fill.executed_at),
        });

        let direction = fill.side.direction();
        let fill_quantity = fill.quantity.value();
        let price = fill.price.value();
        let was_flat = book.position.is_flat();

        if was_flat {
            // fresh position for a symbol that had closed out earlier
            book.position =
                Position::open(fill.symbol.clone(), self.venue.clone(), fill.executed_at);
        }

        let mut realized = 0.0;
        let position_quantity = book.position.quantity;
        let closing = position_quantity != 0 && position_quantity.signum() != direction;

        if !closing {
            book.lots.push_back(Lot::new(
                direction * fill_quantity,
                price,
                fill.executed_at,
            ));
        } else {
            let mut remaining = fill_quantity;
            while remaining > 0 {
                let Some(front) = book.lots.front_mut() else {
                    break;
                };
                let take = remaining.min(front.remaining_quantity.abs());
                // long lots realize (exit - entry), short lots (entry - exit)
                realized += if front.remaining_quantity > 0 {
                    (price - front.entry_price) * take as f64
                } else {
                    (front.entry_price - price) * take as f64
                };
                front.remaining_quantity += direction * take;
                remaining -= take;
                if front.remaining_quantity == 0 {
                    book.lots.pop_front();
                }
            }
            if remaining > 0 {
                // reversal: the excess opens a fresh lot the other way
                book.lots
                    .push_back(Lot::new(direction * remaining, price, fill.executed_at));
            }
        }

        realized -= fill.total_charges();
        book.position.realized_pnl += realized;
        book.position.quantity = book.lot_sum();
        book.recompute_average();

        let closed = book.position.quantity == 0;
        let mut final_realized_pnl = None;
        if closed {
            book.position.closed_at = Some(Utc::now());
            book.position.unrealized_pnl = 0.0;
            final_realized_pnl = Some(book.position.realized_pnl);
            info!(
                "position {} closed, realized {:+.2}",
                fill.symbol, book.position.realized_pnl
            );
        }

        let result = FillApplication {
            symbol: fill.symbol.clone(),
            realized_delta: realized,
            position_quantity: book.position.quantity,
            closed,
            opened: was_flat && !closed,
            final_realized_pnl,
        };
        drop(books);

        self.add_realized(realized);
        result
    }

    /// Recompute unrealized P&L from the latest price without touching
    /// realized P&L. Returns the new unrealized value for the symbol.
    pub fn mark_to_market(&self, symbol: &str, last_price: Price) -> Option<f64> {
        let mut books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        let book = books.get_mut(symbol)?;
        if book.position.is_flat() {
            return None;
        }
        // (last - entry) * signed remaining covers long and short lots alike
        let unrealized: f64 = book
            .lots
            .iter()
            .map(|l| (last_price.value() - l.entry_price) * l.remaining_quantity as f64)
            .sum();
        book.position.unrealized_pnl = unrealized;
        Some(unrealized)
    }

    /// Replace the lot queue with a single synthetic lot matching the
    /// venue's reported quantity and price. Used only by reconciliation;
    /// the caller must log the correction as a reconciliation issue.
    /// Returns the internal quantity that was replaced.
    pub fn force_correct(
        &self,
        symbol: &str,
        venue_quantity: i64,
        venue_avg_price: f64,
        reason: &str,
    ) -> i64 {
        let mut books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let book = books.entry(symbol.to_string()).or_insert_with(|| Book {
            lots: VecDeque::new(),
            position: Position::open(symbol.to_string(), self.venue.clone(), now),
        });
        let previous = book.position.quantity;

        warn!(
            "force-correcting {}: internal quantity {} -> venue {} ({})",
            symbol, previous, venue_quantity, reason
        );

        book.lots.clear();
        if venue_quantity == 0 {
            book.position.quantity = 0;
            book.position.average_price = 0.0;
            book.position.unrealized_pnl = 0.0;
            book.position.closed_at = Some(now);
        } else {
            if book.position.is_flat() {
                book.position = Position::open(symbol.to_string(), self.venue.clone(), now);
            }
            book.lots
                .push_back(Lot::new(venue_quantity, venue_avg_price, now));
            book.position.quantity = venue_quantity;
            book.position.average_price = venue_avg_price;
            book.position.closed_at = None;
        }
        previous
    }

    /// Attach position-level stops, used by the risk monitor's breach checks.
    pub fn set_stops(&self, symbol: &str, stop_loss: Option<Price>, take_profit: Option<Price>) {
        let mut books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(book) = books.get_mut(symbol) {
            book.position.stop_loss = stop_loss;
            book.position.take_profit = take_profit;
        }
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        let books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        books.get(symbol).map(|b| b.position.clone())
    }

    /// Snapshots of all positions with non-zero quantity.
    pub fn open_positions(&self) -> Vec<Position> {
        let books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        books
            .values()
            .filter(|b| !b.position.is_flat())
            .map(|b| b.position.clone())
            .collect()
    }

    pub fn open_position_count(&self) -> usize {
        let books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        books.values().filter(|b| !b.position.is_flat()).count()
    }

    /// Capital parked in open lots, at entry prices.
    pub fn open_exposure(&self) -> f64 {
        let books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        books
            .values()
            .flat_map(|b| b.lots.iter())
            .map(|l| l.entry_price * l.remaining_quantity.abs() as f64)
            .sum()
    }

    pub fn total_unrealized_pnl(&self) -> f64 {
        let books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        books
            .values()
            .filter(|b| !b.position.is_flat())
            .map(|b| b.position.unrealized_pnl)
            .sum()
    }

    pub fn today_realized_pnl(&self) -> f64 {
        let mut realized = self.realized.lock().unwrap_or_else(|e| e.into_inner());
        Self::roll_date(&mut realized);
        realized.today
    }

    pub fn total_realized_pnl(&self) -> f64 {
        let realized = self.realized.lock().unwrap_or_else(|e| e.into_inner());
        realized.cumulative
    }

    fn add_realized(&self, delta: f64) {
        let mut realized = self.realized.lock().unwrap_or_else(|e| e.into_inner());
        Self::roll_date(&mut realized);
        realized.today += delta;
        realized.cumulative += delta;
    }

    fn roll_date(realized: &mut DailyRealized) {
        let today = Utc::now().date_naive();
        if realized.date != today {
            realized.date = today;
            realized.today = 0.0;
        }
    }

    /// Ledger invariant: signed lot remainders sum to the position quantity.
    /// Exposed for tests and reconciliation sanity checks.
    pub fn check_invariant(&self, symbol: &str) -> bool {
        let books = self.books.lock().unwrap_or_else(|e| e.into_inner());
        books
            .get(symbol)
            .map(|b| b.lot_sum() == b.position.quantity)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::fill::TransactionCosts;
    use crate::domain::entities::order::OrderSide;
    use crate::domain::value_objects::quantity::Quantity;

    fn ledger() -> PositionLedger {
        PositionLedger::new("NSE".to_string())
    }

    fn fill(symbol: &str, side: OrderSide, qty: i64, price: f64, charges: f64) -> Fill {
        Fill::new(
            "ord_test".to_string(),
            None,
            symbol.to_string(),
            side,
            Quantity::new(qty).unwrap(),
            Price::new(price).unwrap(),
            TransactionCosts::new(charges, 0.0, 0.0),
            Utc::now(),
        )
    }

    #[test]
    fn test_opening_fill_creates_position() {
        let ledger = ledger();
        let result = ledger.apply_fill(&fill("RELIANCE", OrderSide::Buy, 100, 2450.0, 0.0));
        assert!(result.opened);
        assert_eq!(result.position_quantity, 100);

        let pos = ledger.position("RELIANCE").unwrap();
        assert_eq!(pos.quantity, 100);
        assert!((pos.average_price - 2450.0).abs() < 1e-9);
        assert!(ledger.check_invariant("RELIANCE"));
    }

    #[test]
    fn test_same_direction_fills_average() {
        let ledger = ledger();
        ledger.apply_fill(&fill("TCS", OrderSide::Buy, 100, 3000.0, 0.0));
        ledger.apply_fill(&fill("TCS", OrderSide::Buy, 100, 3100.0, 0.0));

        let pos = ledger.position("TCS").unwrap();
        assert_eq!(pos.quantity, 200);
        assert!((pos.average_price - 3050.0).abs() < 1e-9);
        assert!(ledger.check_invariant("TCS"));
    }

    #[test]
    fn test_fifo_close_realizes_oldest_lot_first() {
        let ledger = ledger();
        ledger.apply_fill(&fill("INFY", OrderSide::Buy, 100, 1500.0, 0.0));
        ledger.apply_fill(&fill("INFY", OrderSide::Buy, 100, 1550.0, 0.0));

        // sell 150: consumes all of lot 1 (entry 1500) and 50 of lot 2 (1550)
        let result = ledger.apply_fill(&fill("INFY", OrderSide::Sell, 150, 1600.0, 0.0));
        let expected = (1600.0 - 1500.0) * 100.0 + (1600.0 - 1550.0) * 50.0;
        assert!((result.realized_delta - expected).abs() < 1e-9);
        assert_eq!(result.position_quantity, 50);
        assert!(!result.closed);

        let pos = ledger.position("INFY").unwrap();
        assert!((pos.average_price - 1550.0).abs() < 1e-9);
        assert!(ledger.check_invariant("INFY"));
    }

    #[test]
    fn test_round_trip_closes_position_with_costs() {
        let ledger = ledger();
        ledger.apply_fill(&fill("SBIN", OrderSide::Buy, 100, 600.0, 20.0));
        let result = ledger.apply_fill(&fill("SBIN", OrderSide::Sell, 100, 612.0, 20.0));

        assert!(result.closed);
        assert_eq!(result.position_quantity, 0);
        // gains (612-600)*100 = 1200, minus total costs 40
        assert!((result.final_realized_pnl.unwrap() - 1160.0).abs() < 1e-9);

        let pos = ledger.position("SBIN").unwrap();
        assert!(pos.closed_at.is_some());
        assert_eq!(pos.unrealized_pnl, 0.0);
        assert!(ledger.check_invariant("SBIN"));
    }

    #[test]
    fn test_short_position_pnl() {
        let ledger = ledger();
        ledger.apply_fill(&fill("WIPRO", OrderSide::Sell, 100, 450.0, 0.0));
        let pos = ledger.position("WIPRO").unwrap();
        assert_eq!(pos.quantity, -100);
        assert!(pos.is_short());

        // buy back lower: profit (450 - 440) * 100
        let result = ledger.apply_fill(&fill("WIPRO", OrderSide::Buy, 100, 440.0, 0.0));
        assert!(result.closed);
        assert!((result.realized_delta - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_reversal_closes_and_reopens() {
        let ledger = ledger();
        ledger.apply_fill(&fill("HDFC", OrderSide::Buy, 100, 1600.0, 0.0));

        // sell 150: closes the 100-lot and opens a 50 short at 1620
        let result = ledger.apply_fill(&fill("HDFC", OrderSide::Sell, 150, 1620.0, 0.0));
        assert!((result.realized_delta - 2000.0).abs() < 1e-9);
        assert_eq!(result.position_quantity, -50);
        assert!(!result.closed);

        let pos = ledger.position("HDFC").unwrap();
        assert!(pos.is_short());
        assert!((pos.average_price - 1620.0).abs() < 1e-9);
        assert!(ledger.check_invariant("HDFC"));
    }

    #[test]
    fn test_mark_to_market_does_not_touch_realized() {
        let ledger = ledger();
        ledger.apply_fill(&fill("RELIANCE", OrderSide::Buy, 100, 2450.0, 0.0));

        let unrealized = ledger
            .mark_to_market("RELIANCE", Price::new(2470.0).unwrap())
            .unwrap();
        assert!((unrealized - 2000.0).abs() < 1e-9);

        let pos = ledger.position("RELIANCE").unwrap();
        assert_eq!(pos.realized_pnl, 0.0);
        assert!((pos.unrealized_pnl - 2000.0).abs() < 1e-9);

        // short marks invert
        ledger.apply_fill(&fill("WIPRO", OrderSide::Sell, 100, 450.0, 0.0));
        let unrealized = ledger
            .mark_to_market("WIPRO", Price::new(460.0).unwrap())
            .unwrap();
        assert!((unrealized - (-1000.0)).abs() < 1e-9);
    }

    #[test]
    fn test_force_correct_replaces_lots() {
        let ledger = ledger();
        ledger.apply_fill(&fill("TCS", OrderSide::Buy, 10, 3000.0, 0.0));

        let previous = ledger.force_correct("TCS", 8, 3005.0, "venue reports 8");
        assert_eq!(previous, 10);

        let pos = ledger.position("TCS").unwrap();
        assert_eq!(pos.quantity, 8);
        assert!((pos.average_price - 3005.0).abs() < 1e-9);
        assert!(ledger.check_invariant("TCS"));
    }

    #[test]
    fn test_force_correct_to_zero_closes() {
        let ledger = ledger();
        ledger.apply_fill(&fill("TCS", OrderSide::Buy, 10, 3000.0, 0.0));
        ledger.force_correct("TCS", 0, 0.0, "phantom position");

        let pos = ledger.position("TCS").unwrap();
        assert!(pos.is_flat());
        assert!(pos.closed_at.is_some());
        assert_eq!(ledger.open_position_count(), 0);
    }

    #[test]
    fn test_force_correct_adopts_unknown_position() {
        let ledger = ledger();
        let previous = ledger.force_correct("IOC", -40, 85.0, "unknown at venue");
        assert_eq!(previous, 0);
        let pos = ledger.position("IOC").unwrap();
        assert_eq!(pos.quantity, -40);
        assert!(ledger.check_invariant("IOC"));
    }

    #[test]
    fn test_today_realized_accumulates() {
        let ledger = ledger();
        ledger.apply_fill(&fill("A", OrderSide::Buy, 10, 100.0, 0.0));
        ledger.apply_fill(&fill("A", OrderSide::Sell, 10, 90.0, 0.0));
        ledger.apply_fill(&fill("B", OrderSide::Buy, 10, 100.0, 0.0));
        ledger.apply_fill(&fill("B", OrderSide::Sell, 10, 110.0, 0.0));
        // -100 + 100
        assert!((ledger.today_realized_pnl() - 0.0).abs() < 1e-9);
        assert!((ledger.total_realized_pnl() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_open_exposure() {
        let ledger = ledger();
        ledger.apply_fill(&fill("A", OrderSide::Buy, 10, 100.0, 0.0));
        ledger.apply_fill(&fill("B", OrderSide::Sell, 5, 200.0, 0.0));
        assert!((ledger.open_exposure() - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_reopen_after_close_resets_position() {
        let ledger = ledger();
        ledger.apply_fill(&fill("A", OrderSide::Buy, 10, 100.0, 0.0));
        ledger.apply_fill(&fill("A", OrderSide::Sell, 10, 110.0, 0.0));
        let result = ledger.apply_fill(&fill("A", OrderSide::Buy, 5, 105.0, 0.0));
        assert!(result.opened);

        let pos = ledger.position("A").unwrap();
        assert_eq!(pos.quantity, 5);
        assert_eq!(pos.realized_pnl, 0.0);
        assert!(pos.closed_at.is_none());
        // day-level accumulator keeps the earlier gain
        assert!((ledger.today_realized_pnl() - 100.0).abs() < 1e-9);
    }
}
