//! Persistence Layer
//!
//! Durable store for orders, fills, position snapshots and audit logs.
//! Uses SQLite for local storage with async operations via sqlx. The core
//! only depends on the [`repository::TradeStore`] contract: every call is
//! atomic and durable before it returns.

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),
}

/// Initialize the database connection pool and run migrations.
///
/// # Arguments
/// - `database_url`: Path to SQLite database file (e.g., "sqlite://data/prahari.db")
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", database_url);

    // Ensure data directory exists
    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .log_statements(tracing::log::LevelFilter::Debug);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized");
    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            venue_order_id TEXT,
            symbol TEXT NOT NULL,
            venue TEXT NOT NULL,
            side TEXT NOT NULL,
            kind TEXT NOT NULL,
            product TEXT NOT NULL,
            time_in_force TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            limit_price REAL,
            trigger_price REAL,
            stop_loss REAL,
            take_profit REAL,
            risk_amount REAL,
            risk_reward REAL,
            status TEXT NOT NULL,
            filled_quantity INTEGER NOT NULL DEFAULT 0,
            average_fill_price REAL,
            validation_json TEXT,
            error_detail TEXT,
            note TEXT,
            created_at TIMESTAMP NOT NULL,
            submitted_at TIMESTAMP,
            updated_at TIMESTAMP NOT NULL,
            completed_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fills (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id TEXT NOT NULL,
            venue_trade_id TEXT,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            price REAL NOT NULL,
            brokerage REAL NOT NULL DEFAULT 0,
            exchange_fee REAL NOT NULL DEFAULT 0,
            tax REAL NOT NULL DEFAULT 0,
            net_cash_impact REAL NOT NULL,
            executed_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            symbol TEXT PRIMARY KEY,
            venue TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            average_price REAL NOT NULL,
            realized_pnl REAL NOT NULL,
            unrealized_pnl REAL NOT NULL,
            stop_loss REAL,
            take_profit REAL,
            opened_at TIMESTAMP NOT NULL,
            closed_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconciliation_issues (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            kind TEXT NOT NULL,
            internal_quantity INTEGER NOT NULL,
            venue_quantity INTEGER NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            resolution TEXT,
            detected_at TIMESTAMP NOT NULL,
            resolved_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kill_switch_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            reason TEXT NOT NULL,
            status TEXT NOT NULL,
            account_json TEXT NOT NULL,
            outcomes_json TEXT NOT NULL,
            triggered_at TIMESTAMP NOT NULL,
            completed_at TIMESTAMP,
            deactivated_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;

    Ok(())
}
