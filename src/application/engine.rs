//! Trading engine: component wiring and the strategy-facing API.
//!
//! Owns the ledger, lifecycle manager, reconciliation service and risk
//! monitor, and spawns their background loops. The strategy layer only ever
//! sees this surface: place/cancel/status/positions.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::EngineConfig;
use crate::domain::entities::order::{OrderRequest, OrderStatus};
use crate::domain::entities::position::Position;
use crate::domain::entities::reconciliation::ReconciliationIssue;
use crate::domain::errors::OrderError;
use crate::domain::repositories::broker_gateway::{BrokerGateway, GatewayError};
use crate::domain::services::event_bus::{AlertSink, EventBus, TradingEvent};
use crate::domain::services::order_manager::{OrderAck, OrderLifecycleManager};
use crate::domain::services::position_ledger::PositionLedger;
use crate::domain::services::reconciliation::ReconciliationService;
use crate::domain::services::risk_monitor::{KillSwitch, RiskMonitor};
use crate::persistence::repository::TradeStore;
use crate::task_runner::{run_periodic, TaskPolicy};

pub struct TradingEngine {
    config: EngineConfig,
    ledger: Arc<PositionLedger>,
    orders: Arc<OrderLifecycleManager>,
    risk: Arc<RiskMonitor>,
    reconciliation: Arc<ReconciliationService>,
    events: EventBus,
    kill_switch: Arc<KillSwitch>,
}

impl TradingEngine {
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn BrokerGateway>,
        store: Arc<dyn TradeStore>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let events = EventBus::new(config.event_capacity, alerts);
        let ledger = Arc::new(PositionLedger::new(config.venue.clone()));
        let kill_switch = Arc::new(KillSwitch::new());

        let orders = Arc::new(OrderLifecycleManager::new(
            config.clone(),
            Arc::clone(&gateway),
            Arc::clone(&ledger),
            Arc::clone(&store),
            events.clone(),
            Arc::clone(&kill_switch),
        ));
        let risk = Arc::new(RiskMonitor::new(
            config.risk.clone(),
            Arc::clone(&ledger),
            Arc::clone(&orders),
            Arc::clone(&gateway),
            Arc::clone(&store),
            events.clone(),
            Arc::clone(&kill_switch),
        ));
        let reconciliation = Arc::new(ReconciliationService::new(
            gateway,
            Arc::clone(&ledger),
            store,
            events.clone(),
        ));

        TradingEngine {
            config,
            ledger,
            orders,
            risk,
            reconciliation,
            events,
            kill_switch,
        }
    }

    /// Strategy-facing API: validate and submit an order.
    pub async fn place_order(&self, request: OrderRequest) -> Result<OrderAck, OrderError> {
        self.orders.place_order(request).await
    }

    /// Strategy-facing API: cancel a resting order.
    pub async fn cancel_order(&self, order_id: &str) -> Result<bool, OrderError> {
        self.orders.cancel_order(order_id).await
    }

    /// Strategy-facing API: current status of an order.
    pub fn get_order_status(&self, order_id: &str) -> Option<OrderStatus> {
        self.orders.get_order_status(order_id)
    }

    /// Strategy-facing API: snapshots of all open positions.
    pub fn get_open_positions(&self) -> Vec<Position> {
        self.ledger.open_positions()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TradingEvent> {
        self.events.subscribe()
    }

    pub fn is_halted(&self) -> bool {
        self.kill_switch.is_halted()
    }

    pub async fn trigger_kill_switch(&self, reason: &str) {
        self.risk.trigger_kill_switch(reason).await;
    }

    pub async fn deactivate_kill_switch(&self) {
        self.risk.deactivate_kill_switch().await;
    }

    /// Run one order-status polling pass; exposed for deterministic tests.
    pub async fn poll_orders_once(&self) -> Result<(), String> {
        self.orders.poll_open_orders().await
    }

    /// Run one reconciliation pass; exposed for deterministic tests.
    pub async fn reconcile_once(&self) -> Result<Vec<ReconciliationIssue>, GatewayError> {
        self.reconciliation.run_once().await
    }

    /// Run one account risk check; exposed for deterministic tests.
    pub async fn check_account_risk_once(&self) -> Result<(), String> {
        self.risk.check_account().await
    }

    /// Run one position risk check; exposed for deterministic tests.
    pub async fn check_position_risk_once(&self) -> Result<(), String> {
        self.risk.check_positions().await
    }

    /// Spawn the four background loops: status polling, reconciliation,
    /// account risk and position risk. Each owns its own interval; none
    /// blocks another.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let orders = Arc::clone(&self.orders);
        let poll_interval = self.config.order_poll_interval;
        handles.push(tokio::spawn(async move {
            run_periodic("order_status_poll", TaskPolicy::every(poll_interval), || {
                let orders = Arc::clone(&orders);
                async move { orders.poll_open_orders().await }
            })
            .await;
        }));

        let reconciliation = Arc::clone(&self.reconciliation);
        let recon_interval = self.config.reconciliation_interval;
        handles.push(tokio::spawn(async move {
            run_periodic("reconciliation", TaskPolicy::every(recon_interval), || {
                let reconciliation = Arc::clone(&reconciliation);
                async move {
                    reconciliation
                        .run_once()
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }
            })
            .await;
        }));

        let risk = Arc::clone(&self.risk);
        let risk_interval = self.config.risk_check_interval;
        handles.push(tokio::spawn(async move {
            run_periodic("account_risk", TaskPolicy::every(risk_interval), || {
                let risk = Arc::clone(&risk);
                async move { risk.check_account().await }
            })
            .await;
        }));

        let risk = Arc::clone(&self.risk);
        let risk_interval = self.config.risk_check_interval;
        handles.push(tokio::spawn(async move {
            run_periodic("position_risk", TaskPolicy::every(risk_interval), || {
                let risk = Arc::clone(&risk);
                async move { risk.check_positions().await }
            })
            .await;
        }));

        info!("background tasks started");
        handles
    }
}
