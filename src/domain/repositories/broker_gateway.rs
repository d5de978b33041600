//! Broker Gateway Trait
//!
//! Capability interface over the external execution venue. Every call is a
//! network operation that may fail or time out; the core treats every
//! response as untrusted and reconciles it against its own records.
//! Venue-specific adapters (wire protocol, authentication) live behind this
//! trait and outside the core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::domain::entities::fill::TransactionCosts;
use crate::domain::entities::order::Order;
use crate::domain::value_objects::price::Price;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors from venue calls.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),

    #[error("venue call timed out")]
    Timeout,

    #[error("rate limited by venue")]
    RateLimited,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("venue rejected request: {0}")]
    Rejected(String),

    #[error("unknown venue order id: {0}")]
    UnknownOrder(String),

    #[error("malformed venue response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Transient errors are worth a bounded retry; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Network(_) | GatewayError::Timeout | GatewayError::RateLimited
        )
    }
}

/// Instrument trading state as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tradability {
    Open,
    Halted,
    CircuitBreaker,
}

impl std::fmt::Display for Tradability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tradability::Open => write!(f, "open"),
            Tradability::Halted => write!(f, "halted"),
            Tradability::CircuitBreaker => write!(f, "circuit-breaker"),
        }
    }
}

/// Venue-side order state, mapped onto the internal lifecycle by the
/// lifecycle manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueOrderStatus {
    Accepted,
    Working,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

/// One execution reported by the venue.
#[derive(Debug, Clone)]
pub struct VenueFill {
    pub trade_id: String,
    pub quantity: i64,
    pub price: f64,
    pub costs: TransactionCosts,
    pub executed_at: DateTime<Utc>,
    /// Venue sequence number; fills for one order are applied in this order.
    pub sequence: u64,
}

/// Status update for one order, as returned by a poll.
#[derive(Debug, Clone)]
pub struct VenueOrderUpdate {
    pub venue_order_id: String,
    pub status: VenueOrderStatus,
    /// Cumulative filled quantity at the venue.
    pub filled_quantity: i64,
    pub average_price: Option<f64>,
    /// Fills not yet delivered in a previous poll, in venue order.
    pub fills: Vec<VenueFill>,
}

/// Position as reported by the venue (signed quantity).
#[derive(Debug, Clone)]
pub struct VenuePosition {
    pub symbol: String,
    pub quantity: i64,
    pub average_price: f64,
}

/// Capability interface implemented by venue-specific adapters.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Venue name, for logging.
    fn name(&self) -> &str;

    /// Submit an order; returns the venue-assigned order id.
    async fn submit_order(&self, order: &Order) -> GatewayResult<String>;

    /// Cancel a resting order by venue order id.
    async fn cancel_order(&self, venue_order_id: &str) -> GatewayResult<()>;

    /// Fetch status updates for the given venue order ids.
    async fn poll_status(&self, venue_order_ids: &[String])
        -> GatewayResult<Vec<VenueOrderUpdate>>;

    /// All non-zero positions the venue currently reports.
    async fn positions(&self) -> GatewayResult<Vec<VenuePosition>>;

    /// Last traded price for a symbol.
    async fn last_price(&self, symbol: &str) -> GatewayResult<Price>;

    /// Whether the instrument is currently tradable.
    async fn tradability(&self, symbol: &str) -> GatewayResult<Tradability>;
}

/// Bounded-retry policy for venue calls: exponential backoff, capped delay,
/// and a small fixed attempt budget. Non-transient errors fail immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay.saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

/// Run a venue call with bounded retries on transient errors.
pub async fn with_retry<T, F, Fut>(
    op_name: &str,
    policy: &RetryPolicy,
    mut call: F,
) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = GatewayResult<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "venue call '{}' failed (attempt {}/{}): {}; retrying in {:?}",
                    op_name,
                    attempt + 1,
                    policy.max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Timeout.is_transient());
        assert!(GatewayError::Network("reset".to_string()).is_transient());
        assert!(!GatewayError::Rejected("bad order".to_string()).is_transient());
        assert!(!GatewayError::Auth("expired".to_string()).is_transient());
    }

    #[test]
    fn test_retry_delay_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let result = with_retry("test", &policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GatewayError::Timeout)
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let result: GatewayResult<()> = with_retry("test", &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::Timeout) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_fails_fast_on_permanent() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: GatewayResult<()> = with_retry("test", &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::Rejected("margin".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
