//! Reconciliation issue records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of divergence between internal and venue-reported state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    /// The venue reports a position we do not track.
    UnknownPosition,
    /// Both sides track the symbol but disagree on quantity.
    QuantityMismatch,
    /// We track a position the venue does not report.
    PhantomPosition,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueKind::UnknownPosition => write!(f, "UNKNOWN_POSITION"),
            IssueKind::QuantityMismatch => write!(f, "QUANTITY_MISMATCH"),
            IssueKind::PhantomPosition => write!(f, "PHANTOM_POSITION"),
        }
    }
}

/// One detected divergence and how it was resolved.
#[derive(Debug, Clone)]
pub struct ReconciliationIssue {
    pub symbol: String,
    pub kind: IssueKind,
    pub internal_quantity: i64,
    pub venue_quantity: i64,
    pub resolved: bool,
    pub resolution: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReconciliationIssue {
    pub fn detected(
        symbol: String,
        kind: IssueKind,
        internal_quantity: i64,
        venue_quantity: i64,
    ) -> Self {
        ReconciliationIssue {
            symbol,
            kind,
            internal_quantity,
            venue_quantity,
            resolved: false,
            resolution: None,
            detected_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn resolve(&mut self, resolution: String) {
        self.resolved = true;
        self.resolution = Some(resolution);
        self.resolved_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_resolution() {
        let mut issue =
            ReconciliationIssue::detected("TCS".to_string(), IssueKind::QuantityMismatch, 10, 8);
        assert!(!issue.resolved);
        issue.resolve("corrected internal quantity 10 -> 8".to_string());
        assert!(issue.resolved);
        assert!(issue.resolved_at.is_some());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(IssueKind::UnknownPosition.to_string(), "UNKNOWN_POSITION");
        assert_eq!(IssueKind::PhantomPosition.to_string(), "PHANTOM_POSITION");
    }
}
