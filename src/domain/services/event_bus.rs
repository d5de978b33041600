//! Event fan-out and alert dispatch.
//!
//! The bus broadcasts structured events to external consumers (dashboard,
//! audit) with best-effort delivery, and hands alerts to the sink on a
//! detached task so a slow sink can never block a core loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "INFO"),
            AlertSeverity::Warning => write!(f, "WARNING"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// External alert transport. Fire-and-forget: delivery failures are handled
/// (or swallowed) inside the sink, never retried by the core.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, severity: AlertSeverity, title: &str, message: &str);
}

/// Sink that writes alerts to the log. Used in paper mode and tests.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, severity: AlertSeverity, title: &str, message: &str) {
        match severity {
            AlertSeverity::Info => info!("[alert] {}: {}", title, message),
            AlertSeverity::Warning => warn!("[alert] {}: {}", title, message),
            AlertSeverity::Critical => error!("[alert] {}: {}", title, message),
        }
    }
}

/// Structured events broadcast to external consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradingEvent {
    OrderUpdated {
        order_id: String,
        symbol: String,
        status: String,
        filled_quantity: i64,
        timestamp: DateTime<Utc>,
    },
    PositionClosed {
        symbol: String,
        realized_pnl: f64,
        exit_reason: String,
        timestamp: DateTime<Utc>,
    },
    ReconciliationIssue {
        symbol: String,
        kind: String,
        internal_quantity: i64,
        venue_quantity: i64,
        timestamp: DateTime<Utc>,
    },
    RiskUpdate {
        today_realized_pnl: f64,
        drawdown_pct: f64,
        open_positions: usize,
        timestamp: DateTime<Utc>,
    },
    KillSwitchActivated {
        reason: String,
        timestamp: DateTime<Utc>,
    },
    KillSwitchDeactivated {
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast channel plus alert sink handle. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TradingEvent>,
    alerts: Arc<dyn AlertSink>,
}

impl EventBus {
    pub fn new(capacity: usize, alerts: Arc<dyn AlertSink>) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx, alerts }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradingEvent> {
        self.tx.subscribe()
    }

    /// Best-effort broadcast; an empty subscriber set is not an error.
    pub fn publish(&self, event: TradingEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!("no event subscribers; dropped {:?}", event);
        }
    }

    /// Dispatch an alert without blocking the caller.
    pub fn alert(&self, severity: AlertSeverity, title: &str, message: &str) {
        let sink = Arc::clone(&self.alerts);
        let title = title.to_string();
        let message = message.to_string();
        tokio::spawn(async move {
            sink.notify(severity, &title, &message).await;
        });
    }
}
