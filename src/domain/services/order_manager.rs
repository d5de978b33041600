//! Order lifecycle management.
//!
//! Owns every order record and the only path to the venue. `place_order`
//! runs validation, durably records the order, re-checks the kill-switch
//! halt flag as a final gate, then submits. A background poll applies venue
//! updates; cancels and fills funnel through the same per-order status
//! transition under one lock, so a single order's terminal transition can
//! only happen once.

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::domain::entities::fill::Fill;
use crate::domain::entities::order::{
    Order, OrderKind, OrderRequest, OrderSide, OrderStatus, Product, RiskCheck, TimeInForce,
};
use crate::domain::errors::OrderError;
use crate::domain::repositories::broker_gateway::{
    with_retry, BrokerGateway, RetryPolicy, VenueOrderStatus, VenueOrderUpdate,
};
use crate::domain::services::event_bus::{AlertSeverity, EventBus, TradingEvent};
use crate::domain::services::order_validator::{AccountSnapshot, MarketSnapshot, OrderValidator};
use crate::domain::services::position_ledger::PositionLedger;
use crate::domain::services::risk_monitor::KillSwitch;
use crate::domain::value_objects::price::Price;
use crate::domain::value_objects::quantity::Quantity;
use crate::persistence::repository::TradeStore;

/// Submission result returned to the strategy layer.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub venue_order_id: Option<String>,
    pub status: OrderStatus,
}

/// Daily submission/execution counters feeding the order-to-trade check.
struct ActivityCounters {
    date: NaiveDate,
    orders_submitted: u32,
    trades_executed: u32,
}

impl ActivityCounters {
    fn new() -> Self {
        ActivityCounters {
            date: Utc::now().date_naive(),
            orders_submitted: 0,
            trades_executed: 0,
        }
    }

    fn roll(&mut self) {
        let today = Utc::now().date_naive();
        if self.date != today {
            self.date = today;
            self.orders_submitted = 0;
            self.trades_executed = 0;
        }
    }
}

pub struct OrderLifecycleManager {
    config: EngineConfig,
    validator: OrderValidator,
    gateway: Arc<dyn BrokerGateway>,
    ledger: Arc<PositionLedger>,
    store: Arc<dyn TradeStore>,
    events: EventBus,
    kill_switch: Arc<KillSwitch>,
    retry: RetryPolicy,
    orders: Mutex<HashMap<String, Order>>,
    /// venue order id -> internal order id
    venue_index: Mutex<HashMap<String, String>>,
    counters: Mutex<ActivityCounters>,
    seq: AtomicU64,
}

impl OrderLifecycleManager {
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn BrokerGateway>,
        ledger: Arc<PositionLedger>,
        store: Arc<dyn TradeStore>,
        events: EventBus,
        kill_switch: Arc<KillSwitch>,
    ) -> Self {
        let validator = OrderValidator::new(config.risk.clone());
        OrderLifecycleManager {
            config,
            validator,
            gateway,
            ledger,
            store,
            events,
            kill_switch,
            retry: RetryPolicy::default(),
            orders: Mutex::new(HashMap::new()),
            venue_index: Mutex::new(HashMap::new()),
            counters: Mutex::new(ActivityCounters::new()),
            seq: AtomicU64::new(1),
        }
    }

    fn next_order_id(&self) -> String {
        format!(
            "ord_{}_{}",
            Utc::now().timestamp_millis(),
            self.seq.fetch_add(1, Ordering::SeqCst)
        )
    }

    /// Assemble the account view handed to the validator and risk monitor.
    pub fn account_snapshot(&self) -> AccountSnapshot {
        let balance = self.config.starting_balance + self.ledger.total_realized_pnl();
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.roll();
        AccountSnapshot {
            balance,
            available_balance: balance - self.ledger.open_exposure(),
            today_realized_pnl: self.ledger.today_realized_pnl(),
            open_position_count: self.ledger.open_position_count(),
            orders_submitted_today: counters.orders_submitted,
            trades_executed_today: counters.trades_executed,
            trading_halted: self.kill_switch.is_halted(),
        }
    }

    async fn market_snapshot(&self, symbol: &str) -> Result<MarketSnapshot, OrderError> {
        let last_price =
            with_retry("last_price", &self.retry, || self.gateway.last_price(symbol)).await?;
        let tradability = with_retry("tradability", &self.retry, || {
            self.gateway.tradability(symbol)
        })
        .await?;
        Ok(MarketSnapshot {
            last_price,
            tradability,
            lot_size: self.config.lot_size(symbol),
        })
    }

    /// Validate, durably record, and submit a strategy order.
    ///
    /// Validation rejections are recorded as REJECTED orders for audit
    /// symmetry. A venue error after validation passed leaves the order
    /// terminal FAILED; it is not resubmitted automatically, because a blind
    /// retry of an order is itself a risk the strategy must own.
    pub async fn place_order(&self, request: OrderRequest) -> Result<OrderAck, OrderError> {
        let market = self.market_snapshot(&request.symbol).await?;
        let account = self.account_snapshot();
        let positions = self.ledger.open_positions();

        let outcome = self
            .validator
            .validate(&request, &account, &positions, &market);
        for warning in &outcome.warnings {
            warn!("order warning for {}: {}", request.symbol, warning);
        }

        let mut order = Order::from_request(self.next_order_id(), &request);
        let entry = self
            .validator
            .estimated_entry_price(&request, market.last_price);
        order.risk_amount = self.validator.risk_amount(&request, entry);
        order.risk_reward = match (request.stop_loss, request.take_profit) {
            (Some(stop), Some(tp)) => {
                let risk = (entry - stop.value()).abs();
                let reward = match request.side {
                    OrderSide::Buy => tp.value() - entry,
                    OrderSide::Sell => entry - tp.value(),
                };
                (risk > 0.0).then(|| reward / risk)
            }
            _ => None,
        };
        order.validation = Some(outcome.clone());
        order.note = Some("strategy".to_string());

        if !outcome.valid {
            let check = outcome.failed_check.unwrap_or(RiskCheck::Balance);
            let reason = outcome.reason.clone().unwrap_or_default();
            order.error_detail = Some(reason.clone());
            order.transition_to(OrderStatus::Rejected)?;
            self.store
                .create_order(&order)
                .await
                .map_err(|e| OrderError::Store(e.to_string()))?;
            self.publish_order_event(&order);
            self.insert_order(order);
            info!("order rejected by {} check: {}", check, reason);
            return Err(OrderError::Rejected { check, reason });
        }

        // durably record PENDING before touching the venue
        self.store
            .create_order(&order)
            .await
            .map_err(|e| OrderError::Store(e.to_string()))?;
        self.insert_order(order.clone());

        // final halt gate, synchronous with submission
        if self.kill_switch.is_halted() {
            let order = self
                .mutate_order(&order.id, |o| {
                    o.error_detail = Some("trading halted by kill switch".to_string());
                    o.transition_to(OrderStatus::Rejected)
                })
                .await?;
            self.publish_order_event(&order);
            return Err(OrderError::TradingHalted(
                "kill switch engaged between validation and submission".to_string(),
            ));
        }

        self.submit(order).await
    }

    /// Submit a recorded PENDING order to the venue.
    async fn submit(&self, order: Order) -> Result<OrderAck, OrderError> {
        let submit_result = with_retry("submit_order", &self.retry, || {
            self.gateway.submit_order(&order)
        })
        .await;

        match submit_result {
            Ok(venue_order_id) => {
                let order = self
                    .mutate_order(&order.id, |o| {
                        o.venue_order_id = Some(venue_order_id.clone());
                        o.transition_to(OrderStatus::Submitted)
                    })
                    .await?;
                self.venue_index
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(venue_order_id.clone(), order.id.clone());
                {
                    let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
                    counters.roll();
                    counters.orders_submitted += 1;
                }
                self.publish_order_event(&order);
                info!(
                    "order {} submitted to {} as {}",
                    order.id,
                    self.gateway.name(),
                    venue_order_id
                );
                Ok(OrderAck {
                    order_id: order.id,
                    venue_order_id: Some(venue_order_id),
                    status: OrderStatus::Submitted,
                })
            }
            Err(e) => {
                let order = self
                    .mutate_order(&order.id, |o| {
                        o.error_detail = Some(e.to_string());
                        o.transition_to(OrderStatus::Failed)
                    })
                    .await?;
                self.publish_order_event(&order);
                self.events.alert(
                    AlertSeverity::Warning,
                    "Order submission failed",
                    &format!("order {} for {}: {}", order.id, order.symbol, e),
                );
                Err(OrderError::SubmissionFailed(e))
            }
        }
    }

    /// Cancel a resting order. Only permitted from SUBMITTED/OPEN; a venue
    /// error surfaces unchanged so the caller can retry or escalate. If a
    /// fill wins the race, the caller gets an "already terminal" result.
    pub async fn cancel_order(&self, order_id: &str) -> Result<bool, OrderError> {
        let venue_order_id = {
            let orders = self.orders.lock().unwrap_or_else(|e| e.into_inner());
            let order = orders
                .get(order_id)
                .ok_or_else(|| OrderError::UnknownOrder(order_id.to_string()))?;
            if order.is_terminal() {
                return Err(OrderError::AlreadyTerminal {
                    id: order.id.clone(),
                    status: order.status,
                });
            }
            if !matches!(order.status, OrderStatus::Submitted | OrderStatus::Open) {
                return Err(OrderError::NotCancellable {
                    id: order.id.clone(),
                    status: order.status,
                });
            }
            order
                .venue_order_id
                .clone()
                .ok_or_else(|| OrderError::UnknownOrder(order_id.to_string()))?
        };

        with_retry("cancel_order", &self.retry, || {
            self.gateway.cancel_order(&venue_order_id)
        })
        .await?;

        // the fill poller may have beaten us to a terminal status
        let order = self
            .mutate_order(order_id, |o| o.transition_to(OrderStatus::Cancelled))
            .await?;
        self.publish_order_event(&order);
        info!("order {} cancelled", order_id);
        Ok(true)
    }

    /// One polling pass over all non-terminal submitted orders.
    pub async fn poll_open_orders(&self) -> Result<(), String> {
        let venue_ids: Vec<String> = {
            let orders = self.orders.lock().unwrap_or_else(|e| e.into_inner());
            orders
                .values()
                .filter(|o| matches!(o.status, OrderStatus::Submitted | OrderStatus::Open))
                .filter_map(|o| o.venue_order_id.clone())
                .collect()
        };
        if venue_ids.is_empty() {
            return Ok(());
        }

        let updates = with_retry("poll_status", &self.retry, || {
            self.gateway.poll_status(&venue_ids)
        })
        .await
        .map_err(|e| format!("status poll failed: {}", e))?;

        for update in updates {
            if let Err(e) = self.apply_update(update).await {
                // one order's bad update must not starve the rest
                error!("failed to apply venue update: {}", e);
            }
        }
        Ok(())
    }

    /// Apply one venue update: fills first (in venue-reported order), then
    /// any terminal non-fill status.
    async fn apply_update(&self, update: VenueOrderUpdate) -> Result<(), OrderError> {
        let order_id = {
            let index = self.venue_index.lock().unwrap_or_else(|e| e.into_inner());
            match index.get(&update.venue_order_id) {
                Some(id) => id.clone(),
                None => {
                    warn!(
                        "venue update for unknown order {}; leaving to reconciliation",
                        update.venue_order_id
                    );
                    return Ok(());
                }
            }
        };

        let mut fills = update.fills;
        fills.sort_by_key(|f| f.sequence);

        for venue_fill in fills {
            let price = Price::new(venue_fill.price).map_err(|e| {
                OrderError::Store(format!(
                    "venue reported unusable fill price {}: {}",
                    venue_fill.price, e
                ))
            })?;
            let quantity = Quantity::new(venue_fill.quantity).map_err(|e| {
                OrderError::Store(format!(
                    "venue reported unusable fill quantity {}: {}",
                    venue_fill.quantity, e
                ))
            })?;

            let order = {
                let mut orders = self.orders.lock().unwrap_or_else(|e| e.into_inner());
                let order = orders
                    .get_mut(&order_id)
                    .ok_or_else(|| OrderError::UnknownOrder(order_id.clone()))?;
                if order.is_terminal() {
                    // a cancel (or an earlier fill) won the race; this one is stale
                    warn!(
                        "dropping stale fill for terminal order {} ({})",
                        order.id, order.status
                    );
                    return Ok(());
                }
                order.record_fill(quantity.value(), price)?;
                order.clone()
            };

            let fill = Fill::new(
                order.id.clone(),
                Some(venue_fill.trade_id.clone()),
                order.symbol.clone(),
                order.side,
                quantity,
                price,
                venue_fill.costs,
                venue_fill.executed_at,
            );
            self.store
                .append_fill(&fill)
                .await
                .map_err(|e| OrderError::Store(e.to_string()))?;

            let application = self.ledger.apply_fill(&fill);
            if application.opened {
                self.ledger
                    .set_stops(&order.symbol, order.stop_loss, order.take_profit);
            }
            if let Some(position) = self.ledger.position(&order.symbol) {
                self.store
                    .upsert_position(&position)
                    .await
                    .map_err(|e| OrderError::Store(e.to_string()))?;
            }
            {
                let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
                counters.roll();
                counters.trades_executed += 1;
            }
            self.store
                .update_order(&order)
                .await
                .map_err(|e| OrderError::Store(e.to_string()))?;
            self.publish_order_event(&order);

            if application.closed {
                let realized = application.final_realized_pnl.unwrap_or(0.0);
                info!(
                    "position {} closed via order {} ({:+.2})",
                    order.symbol, order.id, realized
                );
                self.events.publish(TradingEvent::PositionClosed {
                    symbol: order.symbol.clone(),
                    realized_pnl: realized,
                    exit_reason: order.note.clone().unwrap_or_else(|| "order_fill".to_string()),
                    timestamp: Utc::now(),
                });
            }
        }

        // non-fill terminal states and the resting confirmation
        let target = match update.status {
            VenueOrderStatus::Working => Some(OrderStatus::Open),
            VenueOrderStatus::Cancelled => Some(OrderStatus::Cancelled),
            VenueOrderStatus::Rejected => Some(OrderStatus::Rejected),
            VenueOrderStatus::Accepted
            | VenueOrderStatus::PartiallyFilled
            | VenueOrderStatus::Filled => None,
        };
        if let Some(target) = target {
            let transition = self.mutate_order(&order_id, |o| o.transition_to(target)).await;
            match transition {
                Ok(order) => self.publish_order_event(&order),
                Err(OrderError::AlreadyTerminal { id, status }) => {
                    debug!("order {} already terminal ({}); venue update ignored", id, status);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Force-close an open position with a market order, bypassing the
    /// validator. Used by the risk monitor and the kill switch; risk-reducing
    /// orders must go through even while the halt flag is set.
    pub async fn close_position(&self, symbol: &str, reason: &str) -> Result<OrderAck, OrderError> {
        let position = self
            .ledger
            .position(symbol)
            .filter(|p| !p.is_flat())
            .ok_or_else(|| OrderError::NoOpenPosition(symbol.to_string()))?;

        let side = if position.is_long() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let request = OrderRequest {
            symbol: symbol.to_string(),
            venue: position.venue.clone(),
            side,
            quantity: Quantity::new(position.quantity.abs())
                .map_err(OrderError::InvalidRequest)?,
            kind: OrderKind::Market,
            limit_price: None,
            trigger_price: None,
            product: Product::Intraday,
            time_in_force: TimeInForce::ImmediateOrCancel,
            stop_loss: None,
            take_profit: None,
        };

        let mut order = Order::from_request(self.next_order_id(), &request);
        order.note = Some(reason.to_string());
        info!(
            "closing position {} ({} units): {}",
            symbol, position.quantity, reason
        );

        self.store
            .create_order(&order)
            .await
            .map_err(|e| OrderError::Store(e.to_string()))?;
        self.insert_order(order.clone());
        self.submit(order).await
    }

    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        let orders = self.orders.lock().unwrap_or_else(|e| e.into_inner());
        orders.get(order_id).cloned()
    }

    pub fn get_order_status(&self, order_id: &str) -> Option<OrderStatus> {
        self.get_order(order_id).map(|o| o.status)
    }

    pub fn open_orders(&self) -> Vec<Order> {
        let orders = self.orders.lock().unwrap_or_else(|e| e.into_inner());
        orders
            .values()
            .filter(|o| !o.is_terminal())
            .cloned()
            .collect()
    }

    fn insert_order(&self, order: Order) {
        let mut orders = self.orders.lock().unwrap_or_else(|e| e.into_inner());
        orders.insert(order.id.clone(), order);
    }

    /// Mutate one order under the map lock, then persist the new snapshot.
    /// All status transitions funnel through here, so terminal races resolve
    /// to exactly one winner.
    async fn mutate_order<F>(&self, order_id: &str, f: F) -> Result<Order, OrderError>
    where
        F: FnOnce(&mut Order) -> Result<(), OrderError>,
    {
        let order = {
            let mut orders = self.orders.lock().unwrap_or_else(|e| e.into_inner());
            let order = orders
                .get_mut(order_id)
                .ok_or_else(|| OrderError::UnknownOrder(order_id.to_string()))?;
            f(order)?;
            order.clone()
        };
        self.store
            .update_order(&order)
            .await
            .map_err(|e| OrderError::Store(e.to_string()))?;
        Ok(order)
    }

    fn publish_order_event(&self, order: &Order) {
        self.events.publish(TradingEvent::OrderUpdated {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            status: order.status.to_string(),
            filled_quantity: order.filled_quantity,
            timestamp: Utc::now(),
        });
    }
}
