use std::collections::HashMap;
use std::time::Duration;

/// Pre-trade and monitoring risk limits.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Maximum risk per trade as a fraction of account balance.
    pub max_risk_per_trade_pct: f64,
    /// Warn (non-fatal) above this fraction of account balance.
    pub warn_risk_per_trade_pct: f64,
    /// Daily realized-loss limit as a fraction of account balance.
    pub max_daily_loss_pct: f64,
    /// Warn once today's loss reaches this fraction of the daily limit.
    pub daily_loss_warn_fraction: f64,
    /// Minimum acceptable reward/risk ratio.
    pub min_risk_reward: f64,
    /// Warn when the ratio clears the minimum but sits below this.
    pub preferred_risk_reward: f64,
    /// Warn when the stop sits closer than this fraction of entry price.
    pub min_stop_distance_pct: f64,
    /// Cost/slippage buffer applied to the balance check.
    pub balance_buffer: f64,
    /// Estimated-entry markup over LTP for market orders.
    pub market_price_buffer: f64,
    /// Fat-finger band around LTP for non-market prices.
    pub price_band_pct: f64,
    /// Maximum number of simultaneously open positions.
    pub max_open_positions: usize,
    /// Per-order quantity cap.
    pub max_order_quantity: i64,
    /// Reject once (orders submitted / trades executed) exceeds this.
    pub max_order_trade_ratio: f64,
    /// The ratio check only applies after this many trades today.
    pub min_trades_for_ratio: u32,
    /// Close a position once its unrealized loss exceeds this fraction of
    /// account balance.
    pub max_position_loss_pct: f64,
    /// Kill switch fires at this drawdown from peak equity.
    pub max_drawdown_pct: f64,
    /// Optional time-based exit for open positions.
    pub max_position_hold: Option<Duration>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            max_risk_per_trade_pct: 0.02,
            warn_risk_per_trade_pct: 0.01,
            max_daily_loss_pct: 0.06,
            daily_loss_warn_fraction: 0.8,
            min_risk_reward: 2.0,
            preferred_risk_reward: 2.5,
            min_stop_distance_pct: 0.005,
            balance_buffer: 1.05,
            market_price_buffer: 1.02,
            price_band_pct: 0.10,
            max_open_positions: 5,
            max_order_quantity: 10_000,
            max_order_trade_ratio: 10.0,
            min_trades_for_ratio: 5,
            max_position_loss_pct: 0.05,
            max_drawdown_pct: 0.10,
            max_position_hold: None,
        }
    }
}

/// Engine wiring configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub venue: String,
    pub starting_balance: f64,
    /// Instrument lot sizes; symbols not listed use `default_lot_size`.
    pub lot_sizes: HashMap<String, i64>,
    pub default_lot_size: i64,
    pub order_poll_interval: Duration,
    pub reconciliation_interval: Duration,
    pub risk_check_interval: Duration,
    pub event_capacity: usize,
    pub database_url: String,
    pub risk: RiskConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            venue: "NSE".to_string(),
            starting_balance: 100_000.0,
            lot_sizes: HashMap::new(),
            default_lot_size: 1,
            order_poll_interval: Duration::from_millis(1000),
            reconciliation_interval: Duration::from_secs(30),
            risk_check_interval: Duration::from_millis(1000),
            event_capacity: 256,
            database_url: "sqlite://data/prahari.db".to_string(),
            risk: RiskConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults and warning on out-of-range values.
    pub fn from_env() -> EngineConfig {
        let mut config = EngineConfig::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(balance) = std::env::var("STARTING_BALANCE") {
            match balance.parse::<f64>() {
                Ok(value) if value > 0.0 => config.starting_balance = value,
                Ok(value) => {
                    tracing::warn!(
                        "Invalid STARTING_BALANCE value: {} (must be positive), using default: {}",
                        value,
                        config.starting_balance
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse STARTING_BALANCE '{}': {}, using default: {}",
                        balance,
                        e,
                        config.starting_balance
                    );
                }
            }
        }

        if let Ok(pct) = std::env::var("MAX_RISK_PER_TRADE_PCT") {
            if let Ok(value) = pct.parse::<f64>() {
                if (0.001..=0.10).contains(&value) {
                    config.risk.max_risk_per_trade_pct = value;
                } else {
                    tracing::warn!(
                        "MAX_RISK_PER_TRADE_PCT {} out of range (0.001..=0.10), using default",
                        value
                    );
                }
            }
        }

        if let Ok(pct) = std::env::var("MAX_DAILY_LOSS_PCT") {
            if let Ok(value) = pct.parse::<f64>() {
                if (0.005..=0.25).contains(&value) {
                    config.risk.max_daily_loss_pct = value;
                }
            }
        }

        if let Ok(rr) = std::env::var("MIN_RISK_REWARD") {
            if let Ok(value) = rr.parse::<f64>() {
                if value >= 1.0 {
                    config.risk.min_risk_reward = value;
                }
            }
        }

        if let Ok(max_pos) = std::env::var("MAX_OPEN_POSITIONS") {
            if let Ok(value) = max_pos.parse::<usize>() {
                if value > 0 {
                    config.risk.max_open_positions = value;
                }
            }
        }

        if let Ok(max_qty) = std::env::var("MAX_ORDER_QUANTITY") {
            if let Ok(value) = max_qty.parse::<i64>() {
                if value > 0 {
                    config.risk.max_order_quantity = value;
                }
            }
        }

        if let Ok(pct) = std::env::var("MAX_DRAWDOWN_PCT") {
            if let Ok(value) = pct.parse::<f64>() {
                if (0.01..=0.50).contains(&value) {
                    config.risk.max_drawdown_pct = value;
                }
            }
        }

        if let Ok(secs) = std::env::var("MAX_POSITION_HOLD_SECONDS") {
            if let Ok(value) = secs.parse::<u64>() {
                if value > 0 {
                    config.risk.max_position_hold = Some(Duration::from_secs(value));
                }
            }
        }

        if let Ok(millis) = std::env::var("ORDER_POLL_INTERVAL_MS") {
            if let Ok(value) = millis.parse::<u64>() {
                // the lifecycle spec caps polling at 1s
                if (100..=1000).contains(&value) {
                    config.order_poll_interval = Duration::from_millis(value);
                }
            }
        }

        if let Ok(secs) = std::env::var("RECONCILIATION_INTERVAL_SECONDS") {
            if let Ok(value) = secs.parse::<u64>() {
                if (5..=3600).contains(&value) {
                    config.reconciliation_interval = Duration::from_secs(value);
                }
            }
        }

        config
    }

    pub fn lot_size(&self, symbol: &str) -> i64 {
        self.lot_sizes
            .get(symbol)
            .copied()
            .unwrap_or(self.default_lot_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.risk.max_risk_per_trade_pct, 0.02);
        assert_eq!(config.risk.min_risk_reward, 2.0);
        assert_eq!(config.risk.max_daily_loss_pct, 0.06);
        assert!(config.order_poll_interval <= Duration::from_secs(1));
    }

    #[test]
    fn test_lot_size_lookup() {
        let mut config = EngineConfig::default();
        config.lot_sizes.insert("NIFTY".to_string(), 50);
        assert_eq!(config.lot_size("NIFTY"), 50);
        assert_eq!(config.lot_size("RELIANCE"), 1);
    }
}
