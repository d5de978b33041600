//! Real-time risk monitoring and the kill switch.
//!
//! Two independent loops: the account loop watches today's realized P&L and
//! drawdown-from-peak, the position loop watches per-position stops, excess
//! unrealized loss and time-in-position. Either can fire the kill switch,
//! which halts new order acceptance and force-closes every open position.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::RiskConfig;
use crate::domain::entities::kill_switch::{
    AccountSummary, KillSwitchEvent, KillSwitchStatus, LiquidationOutcome,
};
use crate::domain::repositories::broker_gateway::BrokerGateway;
use crate::domain::services::event_bus::{AlertSeverity, EventBus, TradingEvent};
use crate::domain::services::order_manager::OrderLifecycleManager;
use crate::domain::services::position_ledger::PositionLedger;
use crate::persistence::repository::TradeStore;

/// Global trading halt flag plus the record of the activation that set it.
///
/// The flag is a single atomic read on the order path's final gate; the
/// event record sits behind a separate lock taken only on trigger and
/// deactivation.
pub struct KillSwitch {
    halted: AtomicBool,
    event: Mutex<Option<KillSwitchEvent>>,
}

impl KillSwitch {
    pub fn new() -> Self {
        KillSwitch {
            halted: AtomicBool::new(false),
            event: Mutex::new(None),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Arm the switch. Returns false if it was already armed; the second
    /// trigger is a no-op, which is what makes the switch idempotent.
    fn try_arm(&self) -> bool {
        self.halted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn store_event(&self, event: KillSwitchEvent) {
        *self.event.lock().unwrap_or_else(|e| e.into_inner()) = Some(event);
    }

    pub fn last_event(&self) -> Option<KillSwitchEvent> {
        self.event.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn disarm(&self) -> Option<KillSwitchEvent> {
        self.halted.store(false, Ordering::SeqCst);
        let mut guard = self.event.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(event) = guard.as_mut() {
            event.deactivate();
            return Some(event.clone());
        }
        None
    }
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RiskMonitor {
    config: RiskConfig,
    ledger: Arc<PositionLedger>,
    orders: Arc<OrderLifecycleManager>,
    gateway: Arc<dyn BrokerGateway>,
    store: Arc<dyn TradeStore>,
    events: EventBus,
    kill_switch: Arc<KillSwitch>,
    peak_equity: Mutex<f64>,
}

impl RiskMonitor {
    pub fn new(
        config: RiskConfig,
        ledger: Arc<PositionLedger>,
        orders: Arc<OrderLifecycleManager>,
        gateway: Arc<dyn BrokerGateway>,
        store: Arc<dyn TradeStore>,
        events: EventBus,
        kill_switch: Arc<KillSwitch>,
    ) -> Self {
        RiskMonitor {
            config,
            ledger,
            orders,
            gateway,
            store,
            events,
            kill_switch,
            peak_equity: Mutex::new(0.0),
        }
    }

    /// One account-loop iteration: daily loss and drawdown-from-peak.
    pub async fn check_account(&self) -> Result<(), String> {
        let account = self.orders.account_snapshot();
        let equity = account.balance + self.ledger.total_unrealized_pnl();

        let drawdown = {
            let mut peak = self.peak_equity.lock().unwrap_or_else(|e| e.into_inner());
            if equity > *peak {
                *peak = equity;
            }
            if *peak > 0.0 {
                (*peak - equity) / *peak
            } else {
                0.0
            }
        };

        self.events.publish(TradingEvent::RiskUpdate {
            today_realized_pnl: account.today_realized_pnl,
            drawdown_pct: drawdown,
            open_positions: account.open_position_count,
            timestamp: Utc::now(),
        });

        if self.kill_switch.is_halted() {
            // already halted; nothing further to trip
            return Ok(());
        }

        let daily_limit = account.balance * self.config.max_daily_loss_pct;
        if account.today_realized_pnl <= -daily_limit {
            self.trigger_kill_switch(&format!(
                "daily loss limit breached: realized ₹{:.2} against limit ₹{:.2}",
                account.today_realized_pnl, daily_limit
            ))
            .await;
            return Ok(());
        }

        if drawdown >= self.config.max_drawdown_pct {
            self.trigger_kill_switch(&format!(
                "drawdown {:.1}% breached limit {:.1}%",
                drawdown * 100.0,
                self.config.max_drawdown_pct * 100.0
            ))
            .await;
        }
        Ok(())
    }

    /// One position-loop iteration: stop-loss breach, excess unrealized
    /// loss, and the optional time-based exit. Each close attempt is
    /// independent; a failure is escalated and the loop moves on.
    pub async fn check_positions(&self) -> Result<(), String> {
        let account_balance = self.orders.account_snapshot().balance;

        for position in self.ledger.open_positions() {
            let last_price = match self.gateway.last_price(&position.symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(
                        "no price for {} this iteration: {}",
                        position.symbol, e
                    );
                    continue;
                }
            };
            let unrealized = self
                .ledger
                .mark_to_market(&position.symbol, last_price)
                .unwrap_or(0.0);

            let close_reason = if position.stop_loss_breached(last_price) {
                Some(format!(
                    "stop-loss breach: last {} vs stop {}",
                    last_price,
                    position.stop_loss.map(|p| p.to_string()).unwrap_or_default()
                ))
            } else if position.take_profit_reached(last_price) {
                Some(format!(
                    "take-profit reached: last {} vs target {}",
                    last_price,
                    position.take_profit.map(|p| p.to_string()).unwrap_or_default()
                ))
            } else if unrealized < 0.0
                && unrealized.abs() > account_balance * self.config.max_position_loss_pct
            {
                Some(format!(
                    "unrealized loss ₹{:.2} exceeds {:.1}% of balance",
                    unrealized.abs(),
                    self.config.max_position_loss_pct * 100.0
                ))
            } else if let Some(max_hold) = self.config.max_position_hold {
                let held = Utc::now().signed_duration_since(position.opened_at);
                (held.num_seconds() >= max_hold.as_secs() as i64)
                    .then(|| format!("time-based exit after {}s", held.num_seconds()))
            } else {
                None
            };

            if let Some(reason) = close_reason {
                info!("risk close on {}: {}", position.symbol, reason);
                if let Err(e) = self.orders.close_position(&position.symbol, &reason).await {
                    error!("risk close of {} failed: {}", position.symbol, e);
                    self.events.alert(
                        AlertSeverity::Critical,
                        "Risk close failed",
                        &format!("{}: {}", position.symbol, e),
                    );
                }
            }
        }
        Ok(())
    }

    /// Fire the kill switch. Idempotent: a second trigger while the switch
    /// is active is a no-op producing no second event or liquidation pass.
    pub async fn trigger_kill_switch(&self, reason: &str) {
        if !self.kill_switch.try_arm() {
            debug!("kill switch already active; ignoring trigger: {}", reason);
            return;
        }

        let account = self.orders.account_snapshot();
        error!("KILL SWITCH: {}", reason);
        self.events.publish(TradingEvent::KillSwitchActivated {
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        self.events.alert(
            AlertSeverity::Critical,
            "Kill switch activated",
            reason,
        );

        let mut event = KillSwitchEvent::triggered(
            reason.to_string(),
            AccountSummary {
                balance: account.balance,
                today_realized_pnl: account.today_realized_pnl,
                open_position_count: account.open_position_count,
            },
        );

        // per-symbol closes are independent; one failure never aborts the rest
        let mut outcomes = Vec::new();
        for position in self.ledger.open_positions() {
            let outcome = match self
                .orders
                .close_position(&position.symbol, "kill_switch")
                .await
            {
                Ok(ack) => LiquidationOutcome {
                    symbol: position.symbol.clone(),
                    quantity: position.quantity,
                    success: true,
                    order_id: Some(ack.order_id),
                    error: None,
                },
                Err(e) => {
                    error!("kill switch failed to close {}: {}", position.symbol, e);
                    self.events.alert(
                        AlertSeverity::Critical,
                        "Kill switch liquidation failed",
                        &format!(
                            "{} ({} units) requires manual intervention: {}",
                            position.symbol, position.quantity, e
                        ),
                    );
                    LiquidationOutcome {
                        symbol: position.symbol.clone(),
                        quantity: position.quantity,
                        success: false,
                        order_id: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        event.complete(outcomes);
        if event.status == KillSwitchStatus::Completed {
            info!("kill switch liquidation complete");
        }
        if let Err(e) = self.store.log_kill_switch_event(&event).await {
            error!("failed to persist kill switch event: {}", e);
        }
        self.kill_switch.store_event(event);
    }

    /// Explicit, non-automatic deactivation.
    pub async fn deactivate_kill_switch(&self) {
        match self.kill_switch.disarm() {
            Some(event) => {
                info!("kill switch deactivated");
                if let Err(e) = self.store.log_kill_switch_event(&event).await {
                    error!("failed to persist kill switch deactivation: {}", e);
                }
            }
            None => info!("kill switch deactivated (no active event)"),
        }
        self.events.publish(TradingEvent::KillSwitchDeactivated {
            timestamp: Utc::now(),
        });
    }
}
