//! Trade store: the durable read/write contract required by the core.
//!
//! Every call is atomic per operation and durable before it returns. The
//! order/fill log is append-only on the fill side; orders are updated in
//! place, keyed by internal id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, error};

use super::models::*;
use super::{DatabaseError, DbPool};
use crate::domain::entities::fill::Fill;
use crate::domain::entities::kill_switch::KillSwitchEvent;
use crate::domain::entities::order::{Order, ValidationOutcome};
use crate::domain::entities::position::Position;
use crate::domain::entities::reconciliation::ReconciliationIssue;
use crate::domain::value_objects::price::Price;
use crate::domain::value_objects::quantity::Quantity;

/// Durable store contract used by the lifecycle manager, reconciliation
/// service and risk monitor.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn create_order(&self, order: &Order) -> Result<(), DatabaseError>;
    async fn update_order(&self, order: &Order) -> Result<(), DatabaseError>;
    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, DatabaseError>;
    async fn append_fill(&self, fill: &Fill) -> Result<(), DatabaseError>;
    async fn upsert_position(&self, position: &Position) -> Result<(), DatabaseError>;
    async fn log_reconciliation_issue(
        &self,
        issue: &ReconciliationIssue,
    ) -> Result<(), DatabaseError>;
    async fn log_kill_switch_event(&self, event: &KillSwitchEvent) -> Result<(), DatabaseError>;
}

/// SQLite implementation of the trade store.
pub struct SqliteTradeStore {
    pool: DbPool,
}

impl SqliteTradeStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TradeStore for SqliteTradeStore {
    async fn create_order(&self, order: &Order) -> Result<(), DatabaseError> {
        let validation_json = match &order.validation {
            Some(outcome) => Some(
                serde_json::to_string(outcome)
                    .map_err(|e| DatabaseError::QueryError(e.to_string()))?,
            ),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, venue_order_id, symbol, venue, side, kind, product,
                time_in_force, quantity, limit_price, trigger_price,
                stop_loss, take_profit, risk_amount, risk_reward, status,
                filled_quantity, average_fill_price, validation_json,
                error_detail, note, created_at, submitted_at, updated_at,
                completed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                    ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)
            "#,
        )
        .bind(&order.id)
        .bind(&order.venue_order_id)
        .bind(&order.symbol)
        .bind(&order.venue)
        .bind(side_to_str(order.side))
        .bind(kind_to_str(order.kind))
        .bind(product_to_str(order.product))
        .bind(tif_to_str(order.time_in_force))
        .bind(order.quantity.value())
        .bind(order.limit_price.map(|p| p.value()))
        .bind(order.trigger_price.map(|p| p.value()))
        .bind(order.stop_loss.map(|p| p.value()))
        .bind(order.take_profit.map(|p| p.value()))
        .bind(order.risk_amount)
        .bind(order.risk_reward)
        .bind(status_to_str(order.status))
        .bind(order.filled_quantity)
        .bind(order.average_fill_price.map(|p| p.value()))
        .bind(validation_json)
        .bind(&order.error_detail)
        .bind(&order.note)
        .bind(order.created_at)
        .bind(order.submitted_at)
        .bind(order.updated_at)
        .bind(order.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create order {}: {}", order.id, e);
            DatabaseError::QueryError(e.to_string())
        })?;

        debug!("Persisted order {} ({})", order.id, order.status);
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE orders
            SET venue_order_id = ?2, status = ?3, filled_quantity = ?4,
                average_fill_price = ?5, error_detail = ?6,
                submitted_at = ?7, updated_at = ?8, completed_at = ?9
            WHERE id = ?1
            "#,
        )
        .bind(&order.id)
        .bind(&order.venue_order_id)
        .bind(status_to_str(order.status))
        .bind(order.filled_quantity)
        .bind(order.average_fill_price.map(|p| p.value()))
        .bind(&order.error_detail)
        .bind(order.submitted_at)
        .bind(order.updated_at)
        .bind(order.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update order {}: {}", order.id, e);
            DatabaseError::QueryError(e.to_string())
        })?;

        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ?1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let side = parse_side(row.get::<String, _>("side").as_str())?;
        let kind = parse_kind(row.get::<String, _>("kind").as_str())?;
        let product = parse_product(row.get::<String, _>("product").as_str())?;
        let time_in_force = parse_tif(row.get::<String, _>("time_in_force").as_str())?;
        let status = parse_status(row.get::<String, _>("status").as_str())?;

        let quantity = Quantity::new(row.get::<i64, _>("quantity"))
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;
        let price_col = |name: &str| -> Option<Price> {
            row.get::<Option<f64>, _>(name).and_then(|v| Price::new(v).ok())
        };

        let validation: Option<ValidationOutcome> = row
            .get::<Option<String>, _>("validation_json")
            .and_then(|json| serde_json::from_str(&json).ok());

        Ok(Some(Order {
            id: row.get("id"),
            venue_order_id: row.get("venue_order_id"),
            symbol: row.get("symbol"),
            venue: row.get("venue"),
            side,
            quantity,
            kind,
            limit_price: price_col("limit_price"),
            trigger_price: price_col("trigger_price"),
            product,
            time_in_force,
            stop_loss: price_col("stop_loss"),
            take_profit: price_col("take_profit"),
            risk_amount: row.get("risk_amount"),
            risk_reward: row.get("risk_reward"),
            status,
            filled_quantity: row.get("filled_quantity"),
            average_fill_price: price_col("average_fill_price"),
            validation,
            error_detail: row.get("error_detail"),
            note: row.get("note"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            submitted_at: row.get::<Option<DateTime<Utc>>, _>("submitted_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
            completed_at: row.get::<Option<DateTime<Utc>>, _>("completed_at"),
        }))
    }

    async fn append_fill(&self, fill: &Fill) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO fills (
                order_id, venue_trade_id, symbol, side, quantity, price,
                brokerage, exchange_fee, tax, net_cash_impact, executed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&fill.order_id)
        .bind(&fill.venue_trade_id)
        .bind(&fill.symbol)
        .bind(side_to_str(fill.side))
        .bind(fill.quantity.value())
        .bind(fill.price.value())
        .bind(fill.costs.brokerage)
        .bind(fill.costs.exchange_fee)
        .bind(fill.costs.tax)
        .bind(fill.net_cash_impact)
        .bind(fill.executed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to append fill for order {}: {}", fill.order_id, e);
            DatabaseError::QueryError(e.to_string())
        })?;

        Ok(())
    }

    async fn upsert_position(&self, position: &Position) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                symbol, venue, quantity, average_price, realized_pnl,
                unrealized_pnl, stop_loss, take_profit, opened_at, closed_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(symbol) DO UPDATE SET
                venue = excluded.venue,
                quantity = excluded.quantity,
                average_price = excluded.average_price,
                realized_pnl = excluded.realized_pnl,
                unrealized_pnl = excluded.unrealized_pnl,
                stop_loss = excluded.stop_loss,
                take_profit = excluded.take_profit,
                opened_at = excluded.opened_at,
                closed_at = excluded.closed_at
            "#,
        )
        .bind(&position.symbol)
        .bind(&position.venue)
        .bind(position.quantity)
        .bind(position.average_price)
        .bind(position.realized_pnl)
        .bind(position.unrealized_pnl)
        .bind(position.stop_loss.map(|p| p.value()))
        .bind(position.take_profit.map(|p| p.value()))
        .bind(position.opened_at)
        .bind(position.closed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to upsert position {}: {}", position.symbol, e);
            DatabaseError::QueryError(e.to_string())
        })?;

        Ok(())
    }

    async fn log_reconciliation_issue(
        &self,
        issue: &ReconciliationIssue,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO reconciliation_issues (
                symbol, kind, internal_quantity, venue_quantity, resolved,
                resolution, detected_at, resolved_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&issue.symbol)
        .bind(issue.kind.to_string())
        .bind(issue.internal_quantity)
        .bind(issue.venue_quantity)
        .bind(issue.resolved as i64)
        .bind(&issue.resolution)
        .bind(issue.detected_at)
        .bind(issue.resolved_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Failed to log reconciliation issue for {}: {}",
                issue.symbol, e
            );
            DatabaseError::QueryError(e.to_string())
        })?;

        Ok(())
    }

    async fn log_kill_switch_event(&self, event: &KillSwitchEvent) -> Result<(), DatabaseError> {
        let account_json = serde_json::to_string(&event.account)
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;
        let outcomes_json = serde_json::to_string(&event.outcomes)
            .map_err(|e| DatabaseError::QueryError(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO kill_switch_events (
                reason, status, account_json, outcomes_json, triggered_at,
                completed_at, deactivated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&event.reason)
        .bind(event.status.to_string())
        .bind(account_json)
        .bind(outcomes_json)
        .bind(event.triggered_at)
        .bind(event.completed_at)
        .bind(event.deactivated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to log kill switch event: {}", e);
            DatabaseError::QueryError(e.to_string())
        })?;

        Ok(())
    }
}

/// In-memory store used by tests and paper-mode dry runs. Mirrors the
/// SQLite store's contract without touching disk.
#[derive(Default)]
pub struct MemoryTradeStore {
    orders: Mutex<HashMap<String, Order>>,
    fills: Mutex<Vec<Fill>>,
    positions: Mutex<HashMap<String, Position>>,
    issues: Mutex<Vec<ReconciliationIssue>>,
    kill_switch_events: Mutex<Vec<KillSwitchEvent>>,
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn fills(&self) -> Vec<Fill> {
        self.fills
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn issues(&self) -> Vec<ReconciliationIssue> {
        self.issues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn kill_switch_events(&self) -> Vec<KillSwitchEvent> {
        self.kill_switch_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn create_order(&self, order: &Order) -> Result<(), DatabaseError> {
        self.orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<(), DatabaseError> {
        self.orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, DatabaseError> {
        Ok(self
            .orders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(order_id)
            .cloned())
    }

    async fn append_fill(&self, fill: &Fill) -> Result<(), DatabaseError> {
        self.fills
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(fill.clone());
        Ok(())
    }

    async fn upsert_position(&self, position: &Position) -> Result<(), DatabaseError> {
        self.positions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(position.symbol.clone(), position.clone());
        Ok(())
    }

    async fn log_reconciliation_issue(
        &self,
        issue: &ReconciliationIssue,
    ) -> Result<(), DatabaseError> {
        self.issues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(issue.clone());
        Ok(())
    }

    async fn log_kill_switch_event(&self, event: &KillSwitchEvent) -> Result<(), DatabaseError> {
        self.kill_switch_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::{
        OrderKind, OrderRequest, OrderSide, Product, TimeInForce,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    static DB_SEQ: AtomicU32 = AtomicU32::new(0);

    fn temp_db_url() -> String {
        let path = std::env::temp_dir().join(format!(
            "prahari_test_{}_{}.db",
            std::process::id(),
            DB_SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        format!("sqlite://{}", path.display())
    }

    fn sample_order() -> Order {
        let request = OrderRequest {
            symbol: "RELIANCE".to_string(),
            venue: "NSE".to_string(),
            side: OrderSide::Buy,
            quantity: Quantity::new(100).unwrap(),
            kind: OrderKind::Limit,
            limit_price: Some(Price::new(2450.0).unwrap()),
            trigger_price: None,
            product: Product::Intraday,
            time_in_force: TimeInForce::Day,
            stop_loss: Some(Price::new(2430.0).unwrap()),
            take_profit: Some(Price::new(2491.0).unwrap()),
        };
        Order::from_request("ord_store_1".to_string(), &request)
    }

    #[tokio::test]
    async fn test_sqlite_order_round_trip() {
        let pool = super::super::init_database(&temp_db_url()).await.unwrap();
        let store = SqliteTradeStore::new(pool);

        let mut order = sample_order();
        order.validation = Some(ValidationOutcome::accepted(vec!["tight stop".to_string()]));
        store.create_order(&order).await.unwrap();

        order.venue_order_id = Some("V1001".to_string());
        order
            .transition_to(crate::domain::entities::order::OrderStatus::Submitted)
            .unwrap();
        store.update_order(&order).await.unwrap();

        let loaded = store.get_order("ord_store_1").await.unwrap().unwrap();
        assert_eq!(loaded.venue_order_id.as_deref(), Some("V1001"));
        assert_eq!(
            loaded.status,
            crate::domain::entities::order::OrderStatus::Submitted
        );
        assert_eq!(loaded.quantity.value(), 100);
        assert!(loaded.validation.unwrap().valid);

        assert!(store.get_order("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        let store = MemoryTradeStore::new();
        let order = sample_order();
        store.create_order(&order).await.unwrap();
        assert_eq!(store.order_count(), 1);
        let loaded = store.get_order(&order.id).await.unwrap().unwrap();
        assert_eq!(loaded.symbol, "RELIANCE");
    }
}
