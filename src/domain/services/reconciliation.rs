//! Position reconciliation against the venue.
//!
//! Periodically diffs the internal ledger against the venue's reported
//! positions and auto-corrects internal state, trusting the venue: it is
//! the source of truth for what has actually executed. Every
//! correction is logged as an issue and published as an event; "all clear"
//! is only reported when a pass finds zero issues.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::entities::reconciliation::{IssueKind, ReconciliationIssue};
use crate::domain::repositories::broker_gateway::{
    with_retry, BrokerGateway, GatewayError, RetryPolicy, VenuePosition,
};
use crate::domain::services::event_bus::{AlertSeverity, EventBus, TradingEvent};
use crate::domain::services::position_ledger::PositionLedger;
use crate::persistence::repository::TradeStore;

pub struct ReconciliationService {
    gateway: Arc<dyn BrokerGateway>,
    ledger: Arc<PositionLedger>,
    store: Arc<dyn TradeStore>,
    events: EventBus,
    retry: RetryPolicy,
}

impl ReconciliationService {
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        ledger: Arc<PositionLedger>,
        store: Arc<dyn TradeStore>,
        events: EventBus,
    ) -> Self {
        ReconciliationService {
            gateway,
            ledger,
            store,
            events,
            retry: RetryPolicy::default(),
        }
    }

    /// One reconciliation pass. Returns every issue found (all corrected by
    /// the time this returns). Gateway failures surface to the periodic
    /// runner, which logs and continues.
    pub async fn run_once(&self) -> Result<Vec<ReconciliationIssue>, GatewayError> {
        let venue_positions =
            with_retry("positions", &self.retry, || self.gateway.positions()).await?;

        let venue_by_symbol: HashMap<String, VenuePosition> = venue_positions
            .into_iter()
            .filter(|p| p.quantity != 0)
            .map(|p| (p.symbol.clone(), p))
            .collect();
        let internal = self.ledger.open_positions();

        let mut issues = Vec::new();

        // venue-side positions: unknown internally, or quantity disagreement
        for (symbol, venue) in &venue_by_symbol {
            let internal_quantity = internal
                .iter()
                .find(|p| &p.symbol == symbol)
                .map(|p| p.quantity)
                .unwrap_or(0);

            if internal_quantity == 0 {
                let mut issue = ReconciliationIssue::detected(
                    symbol.clone(),
                    IssueKind::UnknownPosition,
                    0,
                    venue.quantity,
                );
                self.ledger.force_correct(
                    symbol,
                    venue.quantity,
                    venue.average_price,
                    "adopting venue position unknown internally",
                );
                issue.resolve(format!(
                    "adopted venue position {} @ ₹{:.2}",
                    venue.quantity, venue.average_price
                ));
                self.record(issue, AlertSeverity::Critical, &mut issues).await;
            } else if internal_quantity != venue.quantity {
                let mut issue = ReconciliationIssue::detected(
                    symbol.clone(),
                    IssueKind::QuantityMismatch,
                    internal_quantity,
                    venue.quantity,
                );
                self.ledger.force_correct(
                    symbol,
                    venue.quantity,
                    venue.average_price,
                    "venue quantity disagrees",
                );
                issue.resolve(format!(
                    "corrected internal quantity {} -> {}",
                    internal_quantity, venue.quantity
                ));
                self.record(issue, AlertSeverity::Warning, &mut issues).await;
            }
        }

        // internal positions the venue does not report
        for position in &internal {
            if !venue_by_symbol.contains_key(&position.symbol) {
                let mut issue = ReconciliationIssue::detected(
                    position.symbol.clone(),
                    IssueKind::PhantomPosition,
                    position.quantity,
                    0,
                );
                self.ledger.force_correct(
                    &position.symbol,
                    0,
                    0.0,
                    "position absent at venue",
                );
                issue.resolve(format!(
                    "force-closed phantom internal position of {}",
                    position.quantity
                ));
                self.record(issue, AlertSeverity::Critical, &mut issues).await;
            }
        }

        if issues.is_empty() {
            debug!("reconciliation pass clean");
        }
        Ok(issues)
    }

    async fn record(
        &self,
        issue: ReconciliationIssue,
        severity: AlertSeverity,
        issues: &mut Vec<ReconciliationIssue>,
    ) {
        warn!(
            "reconciliation {} on {}: internal {} vs venue {}",
            issue.kind, issue.symbol, issue.internal_quantity, issue.venue_quantity
        );
        if let Err(e) = self.store.log_reconciliation_issue(&issue).await {
            // the correction already happened; losing the log row must not hide it
            warn!("failed to persist reconciliation issue: {}", e);
        }
        if let Some(position) = self.ledger.position(&issue.symbol) {
            if let Err(e) = self.store.upsert_position(&position).await {
                warn!("failed to persist corrected position: {}", e);
            }
        }
        self.events.publish(TradingEvent::ReconciliationIssue {
            symbol: issue.symbol.clone(),
            kind: issue.kind.to_string(),
            internal_quantity: issue.internal_quantity,
            venue_quantity: issue.venue_quantity,
            timestamp: issue.detected_at,
        });
        self.events.alert(
            severity,
            "Reconciliation correction",
            &format!(
                "{} on {}: internal {} vs venue {}",
                issue.kind, issue.symbol, issue.internal_quantity, issue.venue_quantity
            ),
        );
        issues.push(issue);
    }
}
