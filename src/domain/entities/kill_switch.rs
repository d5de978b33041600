//! Kill-switch event records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillSwitchStatus {
    /// Triggered; liquidation in progress.
    Active,
    /// Every open position was closed.
    Completed,
    /// One or more liquidations failed; manual intervention required.
    Failed,
    /// Explicitly deactivated by an operator.
    Deactivated,
}

impl std::fmt::Display for KillSwitchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillSwitchStatus::Active => write!(f, "ACTIVE"),
            KillSwitchStatus::Completed => write!(f, "COMPLETED"),
            KillSwitchStatus::Failed => write!(f, "FAILED"),
            KillSwitchStatus::Deactivated => write!(f, "DEACTIVATED"),
        }
    }
}

/// Account state captured the instant the switch fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub balance: f64,
    pub today_realized_pnl: f64,
    pub open_position_count: usize,
}

/// Result of one per-symbol market-close attempt during liquidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationOutcome {
    pub symbol: String,
    pub quantity: i64,
    pub success: bool,
    pub order_id: Option<String>,
    pub error: Option<String>,
}

/// Full record of one kill-switch activation.
#[derive(Debug, Clone)]
pub struct KillSwitchEvent {
    pub reason: String,
    pub account: AccountSummary,
    pub outcomes: Vec<LiquidationOutcome>,
    pub status: KillSwitchStatus,
    pub triggered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl KillSwitchEvent {
    pub fn triggered(reason: String, account: AccountSummary) -> Self {
        KillSwitchEvent {
            reason,
            account,
            outcomes: Vec::new(),
            status: KillSwitchStatus::Active,
            triggered_at: Utc::now(),
            completed_at: None,
            deactivated_at: None,
        }
    }

    /// Close the liquidation pass: FAILED if any per-symbol close failed.
    pub fn complete(&mut self, outcomes: Vec<LiquidationOutcome>) {
        let all_ok = outcomes.iter().all(|o| o.success);
        self.outcomes = outcomes;
        self.status = if all_ok {
            KillSwitchStatus::Completed
        } else {
            KillSwitchStatus::Failed
        };
        self.completed_at = Some(Utc::now());
    }

    pub fn deactivate(&mut self) {
        self.status = KillSwitchStatus::Deactivated;
        self.deactivated_at = Some(Utc::now());
    }
}
