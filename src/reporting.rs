//! Compliance Reporting
//!
//! Read-only façade over the ledger and the approval engine. Produces
//! aggregate reports; holds no state of its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::ledger::{AuditLedger, LedgerSummary};
use crate::audit::query::{LedgerQuery, QueryPage, TimeRange};
use crate::audit::verify::LedgerValidation;
use crate::clock::Clock;
use crate::error::Result;
use crate::workflow::engine::{ApprovalEngine, WorkflowSummary};
use crate::workflow::types::{ApprovalRequest, ApprovalStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: usize,
    pub mean_secs: Option<f64>,
    pub median_secs: Option<f64>,
    pub max_secs: Option<f64>,
}

impl LatencyStats {
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_by(|a, b| a.total_cmp(b));

        let count = samples.len();
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (samples[mid - 1] + samples[mid]) / 2.0
        } else {
            samples[mid]
        };

        Self {
            count,
            mean_secs: Some(samples.iter().sum::<f64>() / count as f64),
            median_secs: Some(median),
            max_secs: samples.last().copied(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub window: TimeRange,
    pub ledger: LedgerSummary,
    pub workflow: WorkflowSummary,
    pub integrity: LedgerValidation,
    /// Creation to quorum, over approved requests.
    pub approval_latency: LatencyStats,
    pub decisions_by_approver: BTreeMap<String, usize>,
}

impl ComplianceReport {
    /// One-line digest for logs and operator output.
    pub fn headline(&self) -> String {
        format!(
            "{} records ({}), {} requests, {:.1}% integrity",
            self.ledger.total_records,
            if self.integrity.valid { "chain intact" } else { "CHAIN BROKEN" },
            self.workflow.total_requests,
            self.integrity.integrity_score_percent
        )
    }
}

#[derive(Clone)]
pub struct ComplianceReporter {
    ledger: Arc<AuditLedger>,
    engine: Arc<ApprovalEngine>,
}

impl ComplianceReporter {
    pub fn new(ledger: Arc<AuditLedger>, engine: Arc<ApprovalEngine>) -> Self {
        Self { ledger, engine }
    }

    /// Integrity always covers the whole ledger; counts honour `range`.
    pub async fn report(&self, range: Option<TimeRange>) -> Result<ComplianceReport> {
        let window = range.unwrap_or_default();

        let ledger = self.ledger.summarize(Some(window)).await?;
        let workflow = self.engine.summarize(Some(window)).await?;
        let integrity = self.ledger.validate().await?;
        if !integrity.valid {
            warn!("Compliance report generated over a broken ledger: {}", integrity.summary());
        }

        let requests: Vec<ApprovalRequest> = self
            .engine
            .list_requests(None)
            .await?
            .into_iter()
            .filter(|r| window.contains(r.created_at))
            .collect();

        let approval_latency = LatencyStats::from_samples(
            requests
                .iter()
                .filter(|r| r.status == ApprovalStatus::Approved)
                .filter_map(|r| r.resolved_at.map(|at| (at - r.created_at).num_milliseconds() as f64 / 1000.0))
                .collect(),
        );

        let mut decisions_by_approver = BTreeMap::new();
        for decision in requests.iter().flat_map(|r| r.all_decisions()) {
            *decisions_by_approver.entry(decision.approver_id.clone()).or_default() += 1;
        }

        let report = ComplianceReport {
            generated_at: self.ledger.clock().now(),
            window,
            ledger,
            workflow,
            integrity,
            approval_latency,
            decisions_by_approver,
        };
        info!("Compliance report: {}", report.headline());
        Ok(report)
    }

    /// Most recent records by one actor, newest first.
    pub async fn actor_activity(&self, actor_id: &str, range: Option<TimeRange>) -> Result<QueryPage> {
        let query = LedgerQuery::new()
            .actor(actor_id)
            .within(range.unwrap_or_default());
        self.ledger.query(&query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_stats_even_count() {
        let stats = LatencyStats::from_samples(vec![40.0, 10.0, 30.0, 20.0]);
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean_secs, Some(25.0));
        assert_eq!(stats.median_secs, Some(25.0));
        assert_eq!(stats.max_secs, Some(40.0));
    }

    #[test]
    fn test_latency_stats_empty() {
        let stats = LatencyStats::from_samples(Vec::new());
        assert_eq!(stats, LatencyStats::default());
        assert!(stats.median_secs.is_none());
    }
}
