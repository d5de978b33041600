use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prahari::application::engine::TradingEngine;
use prahari::config::EngineConfig;
use prahari::domain::services::event_bus::{AlertSink, LogAlertSink, TradingEvent};
use prahari::infrastructure::paper_gateway::PaperGateway;
use prahari::persistence::repository::{SqliteTradeStore, TradeStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env is optional; environment variables win either way
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prahari=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env();
    info!(
        "PRAHARI starting: venue {}, balance ₹{:.2}, daily loss limit {:.1}%",
        config.venue,
        config.starting_balance,
        config.risk.max_daily_loss_pct * 100.0
    );

    let pool = prahari::persistence::init_database(&config.database_url).await?;
    let store: Arc<dyn TradeStore> = Arc::new(SqliteTradeStore::new(pool));
    let alerts: Arc<dyn AlertSink> = Arc::new(LogAlertSink);

    // paper venue with a small seeded watchlist
    let gateway = Arc::new(PaperGateway::new());
    for (symbol, price) in [
        ("RELIANCE", 2450.0),
        ("TCS", 3010.0),
        ("INFY", 1490.0),
        ("SBIN", 612.0),
    ] {
        gateway.set_last_price(symbol, price);
    }

    let engine = Arc::new(TradingEngine::new(config, gateway, store, alerts));
    let handles = engine.spawn_background_tasks();

    // surface broadcast events in the log
    let mut events = engine.subscribe_events();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(TradingEvent::OrderUpdated {
                    order_id, status, ..
                }) => info!("event: order {} -> {}", order_id, status),
                Ok(TradingEvent::PositionClosed {
                    symbol,
                    realized_pnl,
                    exit_reason,
                    ..
                }) => info!(
                    "event: position {} closed ({:+.2}, {})",
                    symbol, realized_pnl, exit_reason
                ),
                Ok(event) => info!("event: {:?}", event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("event logger lagged by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    info!("Engine running. Press Ctrl+C to stop.");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C signal"),
        Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
    }

    info!("Shutting down background tasks...");
    for handle in handles {
        handle.abort();
    }
    event_logger.abort();

    info!("Shutdown complete");
    Ok(())
}
