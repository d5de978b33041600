//! In-process simulated venue.
//!
//! Deterministic [`BrokerGateway`] implementation used by the binary in
//! paper mode and by integration tests. Prices, tradability states, fill
//! behavior and failures are all scriptable, so lifecycle and risk paths
//! can be exercised without a network.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::entities::fill::TransactionCosts;
use crate::domain::entities::order::{Order, OrderSide};
use crate::domain::repositories::broker_gateway::{
    BrokerGateway, GatewayError, GatewayResult, Tradability, VenueFill, VenueOrderStatus,
    VenueOrderUpdate, VenuePosition,
};
use crate::domain::value_objects::price::Price;

/// How submitted orders execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Fill the full quantity immediately at the order price (or LTP).
    Immediate,
    /// Rest until a test drives fills via [`PaperGateway::fire_fill`].
    Resting,
}

struct PaperOrder {
    symbol: String,
    side: OrderSide,
    quantity: i64,
    exec_price: f64,
    status: VenueOrderStatus,
    filled: i64,
}

struct Inner {
    prices: HashMap<String, f64>,
    tradability: HashMap<String, Tradability>,
    orders: HashMap<String, PaperOrder>,
    /// Fills not yet delivered through a poll, per venue order id.
    pending_fills: HashMap<String, Vec<VenueFill>>,
    /// Derived venue-side positions: symbol -> (signed qty, avg price).
    positions: HashMap<String, (i64, f64)>,
    /// When set, reported instead of the derived positions.
    position_override: Option<Vec<VenuePosition>>,
    costs: TransactionCosts,
    mode: FillMode,
    fail_submits: u32,
    fail_cancels: u32,
    order_seq: u64,
    trade_seq: u64,
}

pub struct PaperGateway {
    name: String,
    inner: Mutex<Inner>,
}

impl PaperGateway {
    pub fn new() -> Self {
        PaperGateway {
            name: "paper".to_string(),
            inner: Mutex::new(Inner {
                prices: HashMap::new(),
                tradability: HashMap::new(),
                orders: HashMap::new(),
                pending_fills: HashMap::new(),
                positions: HashMap::new(),
                position_override: None,
                costs: TransactionCosts::default(),
                mode: FillMode::Immediate,
                fail_submits: 0,
                fail_cancels: 0,
                order_seq: 0,
                trade_seq: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_last_price(&self, symbol: &str, price: f64) {
        self.lock().prices.insert(symbol.to_string(), price);
    }

    pub fn set_tradability(&self, symbol: &str, tradability: Tradability) {
        self.lock()
            .tradability
            .insert(symbol.to_string(), tradability);
    }

    pub fn set_fill_mode(&self, mode: FillMode) {
        self.lock().mode = mode;
    }

    pub fn set_costs(&self, costs: TransactionCosts) {
        self.lock().costs = costs;
    }

    /// Make the next `n` submissions fail with a network error.
    pub fn fail_next_submits(&self, n: u32) {
        self.lock().fail_submits = n;
    }

    /// Make the next `n` cancels fail with a network error.
    pub fn fail_next_cancels(&self, n: u32) {
        self.lock().fail_cancels = n;
    }

    /// Override what `positions()` reports, for reconciliation scenarios.
    pub fn set_venue_positions(&self, positions: Vec<VenuePosition>) {
        self.lock().position_override = Some(positions);
    }

    pub fn clear_venue_position_override(&self) {
        self.lock().position_override = None;
    }

    /// Drive a (partial) fill on a resting order.
    pub fn fire_fill(&self, venue_order_id: &str, quantity: i64, price: f64) {
        let mut inner = self.lock();
        inner.trade_seq += 1;
        let sequence = inner.trade_seq;
        let costs = inner.costs;
        let Some(order) = inner.orders.get_mut(venue_order_id) else {
            return;
        };
        order.filled += quantity;
        order.status = if order.filled >= order.quantity {
            VenueOrderStatus::Filled
        } else {
            VenueOrderStatus::PartiallyFilled
        };
        let symbol = order.symbol.clone();
        let side = order.side;
        inner
            .pending_fills
            .entry(venue_order_id.to_string())
            .or_default()
            .push(VenueFill {
                trade_id: format!("T{}", sequence),
                quantity,
                price,
                costs,
                executed_at: Utc::now(),
                sequence,
            });
        Self::apply_to_position(&mut inner, &symbol, side, quantity, price);
    }

    fn apply_to_position(inner: &mut Inner, symbol: &str, side: OrderSide, quantity: i64, price: f64) {
        let signed = side.direction() * quantity;
        let (current, avg) = inner.positions.get(symbol).copied().unwrap_or((0, 0.0));
        let updated = current + signed;
        if updated == 0 {
            inner.positions.remove(symbol);
            return;
        }
        let new_avg = if current == 0 || current.signum() != updated.signum() {
            price
        } else if current.signum() == signed.signum() {
            (avg * current.abs() as f64 + price * signed.abs() as f64) / updated.abs() as f64
        } else {
            avg
        };
        inner.positions.insert(symbol.to_string(), (updated, new_avg));
    }
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerGateway for PaperGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit_order(&self, order: &Order) -> GatewayResult<String> {
        let mut inner = self.lock();
        if inner.fail_submits > 0 {
            inner.fail_submits -= 1;
            return Err(GatewayError::Network("simulated submit failure".to_string()));
        }

        let exec_price = order
            .limit_price
            .map(|p| p.value())
            .or_else(|| inner.prices.get(&order.symbol).copied())
            .ok_or_else(|| {
                GatewayError::Rejected(format!("no price available for {}", order.symbol))
            })?;

        inner.order_seq += 1;
        let venue_order_id = format!("V{}", inner.order_seq);
        inner.orders.insert(
            venue_order_id.clone(),
            PaperOrder {
                symbol: order.symbol.clone(),
                side: order.side,
                quantity: order.quantity.value(),
                exec_price,
                status: VenueOrderStatus::Accepted,
                filled: 0,
            },
        );

        if inner.mode == FillMode::Immediate {
            let quantity = order.quantity.value();
            drop(inner);
            self.fire_fill(&venue_order_id, quantity, exec_price);
        }
        Ok(venue_order_id)
    }

    async fn cancel_order(&self, venue_order_id: &str) -> GatewayResult<()> {
        let mut inner = self.lock();
        if inner.fail_cancels > 0 {
            inner.fail_cancels -= 1;
            return Err(GatewayError::Network("simulated cancel failure".to_string()));
        }
        let order = inner
            .orders
            .get_mut(venue_order_id)
            .ok_or_else(|| GatewayError::UnknownOrder(venue_order_id.to_string()))?;
        if order.status == VenueOrderStatus::Filled {
            return Err(GatewayError::Rejected("order already filled".to_string()));
        }
        order.status = VenueOrderStatus::Cancelled;
        Ok(())
    }

    async fn poll_status(
        &self,
        venue_order_ids: &[String],
    ) -> GatewayResult<Vec<VenueOrderUpdate>> {
        let mut inner = self.lock();
        let mut updates = Vec::new();
        for id in venue_order_ids {
            let Some(order) = inner.orders.get(id) else {
                continue;
            };
            let status = order.status;
            let filled = order.filled;
            let average_price = (filled > 0).then_some(order.exec_price);
            let fills = inner.pending_fills.remove(id).unwrap_or_default();
            updates.push(VenueOrderUpdate {
                venue_order_id: id.clone(),
                status,
                filled_quantity: filled,
                average_price,
                fills,
            });
        }
        Ok(updates)
    }

    async fn positions(&self) -> GatewayResult<Vec<VenuePosition>> {
        let inner = self.lock();
        if let Some(positions) = &inner.position_override {
            return Ok(positions.clone());
        }
        Ok(inner
            .positions
            .iter()
            .map(|(symbol, (quantity, average_price))| VenuePosition {
                symbol: symbol.clone(),
                quantity: *quantity,
                average_price: *average_price,
            })
            .collect())
    }

    async fn last_price(&self, symbol: &str) -> GatewayResult<Price> {
        let inner = self.lock();
        let price = inner
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("no price for {}", symbol)))?;
        Price::new(price).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    async fn tradability(&self, symbol: &str) -> GatewayResult<Tradability> {
        Ok(self
            .lock()
            .tradability
            .get(symbol)
            .copied()
            .unwrap_or(Tradability::Open))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::{
        OrderKind, OrderRequest, Product, TimeInForce,
    };
    use crate::domain::value_objects::quantity::Quantity;

    fn order(symbol: &str, side: OrderSide, qty: i64, limit: Option<f64>) -> Order {
        let request = OrderRequest {
            symbol: symbol.to_string(),
            venue: "NSE".to_string(),
            side,
            quantity: Quantity::new(qty).unwrap(),
            kind: if limit.is_some() {
                OrderKind::Limit
            } else {
                OrderKind::Market
            },
            limit_price: limit.map(|p| Price::new(p).unwrap()),
            trigger_price: None,
            product: Product::Intraday,
            time_in_force: TimeInForce::Day,
            stop_loss: None,
            take_profit: None,
        };
        Order::from_request("ord_pg".to_string(), &request)
    }

    #[tokio::test]
    async fn test_immediate_fill_delivered_once() {
        let gateway = PaperGateway::new();
        gateway.set_last_price("RELIANCE", 2450.0);

        let venue_id = gateway
            .submit_order(&order("RELIANCE", OrderSide::Buy, 100, Some(2450.0)))
            .await
            .unwrap();

        let updates = gateway.poll_status(&[venue_id.clone()]).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, VenueOrderStatus::Filled);
        assert_eq!(updates[0].fills.len(), 1);
        assert_eq!(updates[0].fills[0].quantity, 100);

        // fills are delivered exactly once
        let updates = gateway.poll_status(&[venue_id]).await.unwrap();
        assert!(updates[0].fills.is_empty());
    }

    #[tokio::test]
    async fn test_resting_order_partial_fills() {
        let gateway = PaperGateway::new();
        gateway.set_fill_mode(FillMode::Resting);
        gateway.set_last_price("TCS", 3000.0);

        let venue_id = gateway
            .submit_order(&order("TCS", OrderSide::Buy, 100, Some(3000.0)))
            .await
            .unwrap();
        gateway.fire_fill(&venue_id, 40, 3000.0);

        let updates = gateway.poll_status(&[venue_id.clone()]).await.unwrap();
        assert_eq!(updates[0].status, VenueOrderStatus::PartiallyFilled);
        assert_eq!(updates[0].filled_quantity, 40);

        gateway.fire_fill(&venue_id, 60, 3001.0);
        let updates = gateway.poll_status(&[venue_id]).await.unwrap();
        assert_eq!(updates[0].status, VenueOrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_cancel_resting_order() {
        let gateway = PaperGateway::new();
        gateway.set_fill_mode(FillMode::Resting);
        gateway.set_last_price("TCS", 3000.0);

        let venue_id = gateway
            .submit_order(&order("TCS", OrderSide::Buy, 100, Some(3000.0)))
            .await
            .unwrap();
        gateway.cancel_order(&venue_id).await.unwrap();

        let updates = gateway.poll_status(&[venue_id]).await.unwrap();
        assert_eq!(updates[0].status, VenueOrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_positions_derived_from_fills() {
        let gateway = PaperGateway::new();
        gateway.set_last_price("INFY", 1500.0);
        gateway
            .submit_order(&order("INFY", OrderSide::Buy, 50, Some(1500.0)))
            .await
            .unwrap();

        let positions = gateway.positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, 50);

        gateway
            .submit_order(&order("INFY", OrderSide::Sell, 50, Some(1510.0)))
            .await
            .unwrap();
        assert!(gateway.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_simulated_submit_failure() {
        let gateway = PaperGateway::new();
        gateway.set_last_price("INFY", 1500.0);
        gateway.fail_next_submits(1);

        let err = gateway
            .submit_order(&order("INFY", OrderSide::Buy, 50, Some(1500.0)))
            .await
            .unwrap_err();
        assert!(err.is_transient());

        assert!(gateway
            .submit_order(&order("INFY", OrderSide::Buy, 50, Some(1500.0)))
            .await
            .is_ok());
    }
}
