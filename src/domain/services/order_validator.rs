//! Pre-trade validation.
//!
//! Ten independent checks run in a fixed order and short-circuit on the
//! first failure. The validator is a pure function of the order request and
//! the account/position/market snapshots passed in: it never mutates state
//! and is safe to call concurrently with submission. Every rejection names
//! the failed check and the boundary values involved.

use tracing::debug;

use crate::config::RiskConfig;
use crate::domain::entities::order::{OrderKind, OrderRequest, OrderSide, RiskCheck, ValidationOutcome};
use crate::domain::entities::position::Position;
use crate::domain::repositories::broker_gateway::Tradability;
use crate::domain::value_objects::price::Price;

/// Account state at validation time.
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub available_balance: f64,
    pub today_realized_pnl: f64,
    pub open_position_count: usize,
    pub orders_submitted_today: u32,
    pub trades_executed_today: u32,
    /// Global halt flag set by the kill switch.
    pub trading_halted: bool,
}

/// Market state for the order's instrument.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub last_price: Price,
    pub tradability: Tradability,
    pub lot_size: i64,
}

pub struct OrderValidator {
    config: RiskConfig,
}

impl OrderValidator {
    pub fn new(config: RiskConfig) -> Self {
        OrderValidator { config }
    }

    /// Price used for balance/risk arithmetic before any fill exists:
    /// the limit price where one is set, the trigger for plain stop orders,
    /// and LTP with a slippage markup for market orders.
    pub fn estimated_entry_price(&self, request: &OrderRequest, last_price: Price) -> f64 {
        match request.kind {
            OrderKind::Market => last_price.value() * self.config.market_price_buffer,
            OrderKind::Stop => request
                .trigger_price
                .or(request.limit_price)
                .map(|p| p.value())
                .unwrap_or_else(|| last_price.value()),
            OrderKind::Limit | OrderKind::StopLimit => request
                .limit_price
                .map(|p| p.value())
                .unwrap_or_else(|| last_price.value()),
        }
    }

    /// Rupee amount at risk if the stop is hit: `|entry - stop| * quantity`.
    pub fn risk_amount(&self, request: &OrderRequest, entry_price: f64) -> Option<f64> {
        request
            .stop_loss
            .map(|stop| (entry_price - stop.value()).abs() * request.quantity.value() as f64)
    }

    /// Run all ten checks. Short-circuits on the first failure; warnings
    /// from checks that passed are carried either way.
    pub fn validate(
        &self,
        request: &OrderRequest,
        account: &AccountSnapshot,
        open_positions: &[Position],
        market: &MarketSnapshot,
    ) -> ValidationOutcome {
        let mut warnings = Vec::new();
        let entry_price = self.estimated_entry_price(request, market.last_price);
        let quantity = request.quantity.value();

        // 1. Balance, with cost/slippage buffer
        let required = quantity as f64 * entry_price * self.config.balance_buffer;
        if required > account.available_balance {
            return ValidationOutcome::rejected(
                RiskCheck::Balance,
                format!(
                    "required ₹{:.2} (incl. {:.0}% buffer) exceeds available balance ₹{:.2}",
                    required,
                    (self.config.balance_buffer - 1.0) * 100.0,
                    account.available_balance
                ),
                warnings,
            );
        }

        // 2. Position-count limit; adding to an existing position is always allowed
        let has_open_position = open_positions
            .iter()
            .any(|p| p.symbol == request.symbol && !p.is_flat());
        if !has_open_position && account.open_position_count >= self.config.max_open_positions {
            return ValidationOutcome::rejected(
                RiskCheck::PositionCount,
                format!(
                    "open position count {} already at maximum {}",
                    account.open_position_count, self.config.max_open_positions
                ),
                warnings,
            );
        }

        // 3. Stop-loss presence and side correctness
        let stop = match request.stop_loss {
            Some(stop) => stop,
            None => {
                return ValidationOutcome::rejected(
                    RiskCheck::StopLoss,
                    "stop-loss is mandatory".to_string(),
                    warnings,
                );
            }
        };
        let stop_ok = match request.side {
            OrderSide::Buy => stop.value() < entry_price,
            OrderSide::Sell => stop.value() > entry_price,
        };
        if !stop_ok {
            return ValidationOutcome::rejected(
                RiskCheck::StopLoss,
                format!(
                    "stop-loss {} must be strictly {} entry price ₹{:.2} for {}",
                    stop,
                    match request.side {
                        OrderSide::Buy => "below",
                        OrderSide::Sell => "above",
                    },
                    entry_price,
                    request.side
                ),
                warnings,
            );
        }
        let stop_distance = (entry_price - stop.value()).abs();
        if entry_price > 0.0 && stop_distance / entry_price < self.config.min_stop_distance_pct {
            warnings.push(format!(
                "stop distance ₹{:.2} is under {:.2}% of entry price; expect noise stop-outs",
                stop_distance,
                self.config.min_stop_distance_pct * 100.0
            ));
        }

        // 4. Risk per trade
        let risk = stop_distance * quantity as f64;
        let max_risk = account.balance * self.config.max_risk_per_trade_pct;
        if risk > max_risk {
            return ValidationOutcome::rejected(
                RiskCheck::RiskPerTrade,
                format!(
                    "trade risk ₹{:.2} exceeds limit ₹{:.2} ({:.1}% of balance)",
                    risk,
                    max_risk,
                    self.config.max_risk_per_trade_pct * 100.0
                ),
                warnings,
            );
        }
        if risk > account.balance * self.config.warn_risk_per_trade_pct {
            warnings.push(format!(
                "trade risk ₹{:.2} exceeds {:.1}% of balance",
                risk,
                self.config.warn_risk_per_trade_pct * 100.0
            ));
        }

        // 5. Daily loss limit
        let daily_limit = account.balance * self.config.max_daily_loss_pct;
        if account.today_realized_pnl <= -daily_limit {
            return ValidationOutcome::rejected(
                RiskCheck::DailyLoss,
                format!(
                    "today's realized P&L ₹{:.2} already at daily loss limit ₹{:.2}",
                    account.today_realized_pnl, daily_limit
                ),
                warnings,
            );
        }
        if account.today_realized_pnl - risk < -daily_limit {
            return ValidationOutcome::rejected(
                RiskCheck::DailyLoss,
                format!(
                    "potential loss ₹{:.2} on top of today's ₹{:.2} would breach daily limit ₹{:.2}",
                    risk, account.today_realized_pnl, daily_limit
                ),
                warnings,
            );
        }
        if account.today_realized_pnl <= -daily_limit * self.config.daily_loss_warn_fraction {
            warnings.push(format!(
                "today's realized P&L ₹{:.2} is past {:.0}% of the daily loss limit",
                account.today_realized_pnl,
                self.config.daily_loss_warn_fraction * 100.0
            ));
        }

        // 6. Risk-reward ratio
        let take_profit = match request.take_profit {
            Some(tp) => tp,
            None => {
                return ValidationOutcome::rejected(
                    RiskCheck::RiskReward,
                    "take-profit is required for the risk-reward check".to_string(),
                    warnings,
                );
            }
        };
        let reward = match request.side {
            OrderSide::Buy => take_profit.value() - entry_price,
            OrderSide::Sell => entry_price - take_profit.value(),
        };
        let ratio = reward / stop_distance;
        if ratio < self.config.min_risk_reward {
            return ValidationOutcome::rejected(
                RiskCheck::RiskReward,
                format!(
                    "reward/risk {:.2} below minimum {:.1}",
                    ratio, self.config.min_risk_reward
                ),
                warnings,
            );
        }
        if ratio < self.config.preferred_risk_reward {
            warnings.push(format!(
                "reward/risk {:.2} clears the minimum but sits below {:.1}",
                ratio, self.config.preferred_risk_reward
            ));
        }

        // 7. Price sanity (fat-finger guard) for non-market orders
        if request.kind != OrderKind::Market {
            let order_price = request.limit_price.or(request.trigger_price);
            match order_price {
                None => {
                    return ValidationOutcome::rejected(
                        RiskCheck::PriceSanity,
                        format!("{} order requires a price", request.kind),
                        warnings,
                    );
                }
                Some(price) => {
                    let ltp = market.last_price.value();
                    if price.distance(market.last_price) > ltp * self.config.price_band_pct {
                        return ValidationOutcome::rejected(
                            RiskCheck::PriceSanity,
                            format!(
                                "order price {} outside ±{:.0}% of last traded price ₹{:.2}",
                                price,
                                self.config.price_band_pct * 100.0,
                                ltp
                            ),
                            warnings,
                        );
                    }
                }
            }
        }

        // 8. Quantity limits (positivity is enforced by the Quantity type)
        if quantity > self.config.max_order_quantity {
            return ValidationOutcome::rejected(
                RiskCheck::QuantityLimits,
                format!(
                    "quantity {} exceeds per-order cap {}",
                    quantity, self.config.max_order_quantity
                ),
                warnings,
            );
        }
        if !request.quantity.is_multiple_of(market.lot_size) {
            return ValidationOutcome::rejected(
                RiskCheck::QuantityLimits,
                format!(
                    "quantity {} is not a multiple of lot size {}",
                    quantity, market.lot_size
                ),
                warnings,
            );
        }

        // 9. Order-to-trade ratio
        if account.trades_executed_today >= self.config.min_trades_for_ratio {
            let ratio = account.orders_submitted_today as f64
                / account.trades_executed_today as f64;
            if ratio > self.config.max_order_trade_ratio {
                return ValidationOutcome::rejected(
                    RiskCheck::OrderTradeRatio,
                    format!(
                        "order-to-trade ratio {:.1} ({} orders / {} trades) exceeds {:.0}:1",
                        ratio,
                        account.orders_submitted_today,
                        account.trades_executed_today,
                        self.config.max_order_trade_ratio
                    ),
                    warnings,
                );
            }
        }

        // 10. Venue tradability; also the kill switch's halt gate
        if account.trading_halted {
            return ValidationOutcome::rejected(
                RiskCheck::Tradability,
                "trading halted by kill switch".to_string(),
                warnings,
            );
        }
        if market.tradability != Tradability::Open {
            return ValidationOutcome::rejected(
                RiskCheck::Tradability,
                format!(
                    "{} is not tradable ({})",
                    request.symbol, market.tradability
                ),
                warnings,
            );
        }

        debug!(
            "order for {} passed validation with {} warning(s)",
            request.symbol,
            warnings.len()
        );
        ValidationOutcome::accepted(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::{Product, TimeInForce};
    use crate::domain::value_objects::quantity::Quantity;
    use chrono::Utc;

    fn validator() -> OrderValidator {
        OrderValidator::new(RiskConfig::default())
    }

    fn account() -> AccountSnapshot {
        AccountSnapshot {
            balance: 100_000.0,
            available_balance: 1_000_000.0,
            today_realized_pnl: 0.0,
            open_position_count: 0,
            orders_submitted_today: 0,
            trades_executed_today: 0,
            trading_halted: false,
        }
    }

    fn market(last: f64) -> MarketSnapshot {
        MarketSnapshot {
            last_price: Price::new(last).unwrap(),
            tradability: Tradability::Open,
            lot_size: 1,
        }
    }

    fn limit_buy(qty: i64, limit: f64, stop: f64, target: f64) -> OrderRequest {
        OrderRequest {
            symbol: "RELIANCE".to_string(),
            venue: "NSE".to_string(),
            side: OrderSide::Buy,
            quantity: Quantity::new(qty).unwrap(),
            kind: OrderKind::Limit,
            limit_price: Some(Price::new(limit).unwrap()),
            trigger_price: None,
            product: Product::Intraday,
            time_in_force: TimeInForce::Day,
            stop_loss: Some(Price::new(stop).unwrap()),
            take_profit: Some(Price::new(target).unwrap()),
        }
    }

    fn open_position(symbol: &str, quantity: i64) -> Position {
        let mut pos = Position::open(symbol.to_string(), "NSE".to_string(), Utc::now());
        pos.quantity = quantity;
        pos
    }

    #[test]
    fn test_valid_order_accepted() {
        let outcome = validator().validate(
            &limit_buy(100, 1000.0, 980.0, 1041.0),
            &account(),
            &[],
            &market(1000.0),
        );
        assert!(outcome.valid, "{:?}", outcome.reason);
        assert!(outcome.failed_check.is_none());
    }

    #[test]
    fn test_balance_check_includes_buffer() {
        let mut acct = account();
        // 100 * 1000 * 1.05 = 105_000
        acct.available_balance = 104_999.0;
        let outcome = validator().validate(
            &limit_buy(100, 1000.0, 980.0, 1041.0),
            &acct,
            &[],
            &market(1000.0),
        );
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::Balance));

        acct.available_balance = 105_000.0;
        let outcome = validator().validate(
            &limit_buy(100, 1000.0, 980.0, 1041.0),
            &acct,
            &[],
            &market(1000.0),
        );
        assert!(outcome.valid);
    }

    #[test]
    fn test_position_count_limit_new_symbol() {
        let mut acct = account();
        acct.open_position_count = 5;
        let positions: Vec<Position> = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|s| open_position(s, 10))
            .collect();
        let outcome = validator().validate(
            &limit_buy(100, 1000.0, 980.0, 1041.0),
            &acct,
            &positions,
            &market(1000.0),
        );
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::PositionCount));
    }

    #[test]
    fn test_position_count_allows_adding_to_existing() {
        let mut acct = account();
        acct.open_position_count = 5;
        let mut positions: Vec<Position> = ["A", "B", "C", "D"]
            .iter()
            .map(|s| open_position(s, 10))
            .collect();
        positions.push(open_position("RELIANCE", 50));
        let outcome = validator().validate(
            &limit_buy(100, 1000.0, 980.0, 1041.0),
            &acct,
            &positions,
            &market(1000.0),
        );
        assert!(outcome.valid, "{:?}", outcome.reason);
    }

    #[test]
    fn test_missing_stop_loss_rejected() {
        let mut request = limit_buy(100, 1000.0, 980.0, 1041.0);
        request.stop_loss = None;
        let outcome = validator().validate(&request, &account(), &[], &market(1000.0));
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::StopLoss));
    }

    #[test]
    fn test_stop_loss_wrong_side_rejected() {
        // BUY with stop above entry
        let request = limit_buy(100, 1000.0, 1010.0, 1041.0);
        let outcome = validator().validate(&request, &account(), &[], &market(1000.0));
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::StopLoss));

        // SELL with stop below entry
        let mut request = limit_buy(100, 1000.0, 990.0, 958.0);
        request.side = OrderSide::Sell;
        let outcome = validator().validate(&request, &account(), &[], &market(1000.0));
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::StopLoss));
    }

    #[test]
    fn test_tight_stop_warns_but_passes() {
        // stop 0.3% away from entry
        let request = limit_buy(100, 1000.0, 997.0, 1007.0);
        let outcome = validator().validate(&request, &account(), &[], &market(1000.0));
        assert!(outcome.valid, "{:?}", outcome.reason);
        assert!(outcome.warnings.iter().any(|w| w.contains("stop distance")));
    }

    #[test]
    fn test_risk_per_trade_boundary() {
        // balance 100,000, max 2% = 2,000; entry 1000, stop 980 -> 20/share
        let outcome = validator().validate(
            &limit_buy(100, 1000.0, 980.0, 1041.0),
            &account(),
            &[],
            &market(1000.0),
        );
        assert!(outcome.valid, "risk of exactly ₹2,000 must pass");

        let outcome = validator().validate(
            &limit_buy(101, 1000.0, 980.0, 1041.0),
            &account(),
            &[],
            &market(1000.0),
        );
        assert!(!outcome.valid, "risk of ₹2,020 must fail");
        assert_eq!(outcome.failed_check, Some(RiskCheck::RiskPerTrade));
    }

    #[test]
    fn test_daily_loss_limit_scenario() {
        // limit ₹6,000 on ₹100,000; realized so far -₹5,800
        let mut acct = account();
        acct.today_realized_pnl = -5_800.0;

        // risking ₹300 would take the day to -₹6,100
        let outcome = validator().validate(
            &limit_buy(15, 1000.0, 980.0, 1041.0),
            &acct,
            &[],
            &market(1000.0),
        );
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::DailyLoss));

        // risking ₹150 stays at -₹5,950
        let request = limit_buy(15, 1000.0, 990.0, 1021.0);
        let outcome = validator().validate(&request, &acct, &[], &market(1000.0));
        assert!(outcome.valid, "{:?}", outcome.reason);
        assert!(
            outcome.warnings.iter().any(|w| w.contains("daily loss")),
            "past 80% of the limit must warn"
        );
    }

    #[test]
    fn test_daily_loss_already_at_limit_rejects_everything() {
        let mut acct = account();
        acct.today_realized_pnl = -6_000.0;
        let outcome = validator().validate(
            &limit_buy(1, 1000.0, 999.0, 1002.1),
            &acct,
            &[],
            &market(1000.0),
        );
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::DailyLoss));
    }

    #[test]
    fn test_risk_reward_boundary() {
        // entry 2450, stop 2430 (risk 20), target 2491 (reward 41) -> 2.05
        let outcome = validator().validate(
            &limit_buy(10, 2450.0, 2430.0, 2491.0),
            &account(),
            &[],
            &market(2450.0),
        );
        assert!(outcome.valid, "{:?}", outcome.reason);
        assert!(
            outcome.warnings.iter().any(|w| w.contains("reward/risk")),
            "2.05 sits in the warn band"
        );

        // target 2470 (reward 20) -> ratio 1.0
        let outcome = validator().validate(
            &limit_buy(10, 2450.0, 2430.0, 2470.0),
            &account(),
            &[],
            &market(2450.0),
        );
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::RiskReward));
    }

    #[test]
    fn test_missing_take_profit_rejected() {
        let mut request = limit_buy(10, 2450.0, 2430.0, 2491.0);
        request.take_profit = None;
        let outcome = validator().validate(&request, &account(), &[], &market(2450.0));
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::RiskReward));
    }

    #[test]
    fn test_price_sanity_band() {
        // LTP 2450: limit 3000 is > 110% of LTP
        let outcome = validator().validate(
            &limit_buy(10, 3000.0, 2970.0, 3061.0),
            &account(),
            &[],
            &market(2450.0),
        );
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::PriceSanity));

        // limit 2500 is within the band
        let outcome = validator().validate(
            &limit_buy(10, 2500.0, 2480.0, 2541.0),
            &account(),
            &[],
            &market(2450.0),
        );
        assert!(outcome.valid, "{:?}", outcome.reason);
    }

    #[test]
    fn test_quantity_cap_and_lot_size() {
        let mut config = RiskConfig::default();
        config.max_order_quantity = 500;
        let validator = OrderValidator::new(config);

        let outcome = validator.validate(
            &limit_buy(600, 100.0, 99.0, 102.1),
            &account(),
            &[],
            &market(100.0),
        );
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::QuantityLimits));

        let mut mkt = market(100.0);
        mkt.lot_size = 50;
        let outcome = validator.validate(
            &limit_buy(120, 100.0, 99.0, 102.1),
            &account(),
            &[],
            &mkt,
        );
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::QuantityLimits));
    }

    #[test]
    fn test_order_trade_ratio() {
        let mut acct = account();
        acct.orders_submitted_today = 120;
        acct.trades_executed_today = 10;
        let outcome = validator().validate(
            &limit_buy(10, 1000.0, 990.0, 1021.0),
            &acct,
            &[],
            &market(1000.0),
        );
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::OrderTradeRatio));

        // below the minimum trade count the ratio is not applied
        acct.trades_executed_today = 2;
        acct.orders_submitted_today = 120;
        let outcome = validator().validate(
            &limit_buy(10, 1000.0, 990.0, 1021.0),
            &acct,
            &[],
            &market(1000.0),
        );
        assert!(outcome.valid, "{:?}", outcome.reason);
    }

    #[test]
    fn test_halted_instrument_rejected() {
        let mut mkt = market(1000.0);
        mkt.tradability = Tradability::CircuitBreaker;
        let outcome = validator().validate(
            &limit_buy(10, 1000.0, 990.0, 1021.0),
            &account(),
            &[],
            &mkt,
        );
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::Tradability));
    }

    #[test]
    fn test_kill_switch_halt_gate() {
        let mut acct = account();
        acct.trading_halted = true;
        let outcome = validator().validate(
            &limit_buy(10, 1000.0, 990.0, 1021.0),
            &acct,
            &[],
            &market(1000.0),
        );
        assert!(!outcome.valid);
        assert_eq!(outcome.failed_check, Some(RiskCheck::Tradability));
        assert!(outcome.reason.as_deref().unwrap().contains("kill switch"));
    }

    #[test]
    fn test_market_order_uses_marked_up_ltp() {
        let validator = validator();
        let mut request = limit_buy(10, 1000.0, 990.0, 1051.0);
        request.kind = OrderKind::Market;
        request.limit_price = None;
        let entry =
            validator.estimated_entry_price(&request, Price::new(1000.0).unwrap());
        assert!((entry - 1020.0).abs() < 1e-9);
    }
}
