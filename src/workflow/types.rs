//! Approval Workflow Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::audit::record::Severity;
use crate::canonical::Snapshot;
use crate::error::{OversightError, Result};

/// Risk tier of a gated action. Ordered Low < Medium < High < Critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Next tier up; Critical is already maximal.
    pub fn escalated(&self) -> Self {
        match self {
            RiskLevel::Low => RiskLevel::Medium,
            RiskLevel::Medium => RiskLevel::High,
            RiskLevel::High | RiskLevel::Critical => RiskLevel::Critical,
        }
    }

    /// Severity attached to audit records about requests of this tier.
    pub fn severity(&self) -> Severity {
        match self {
            RiskLevel::Low => Severity::Low,
            RiskLevel::Medium => Severity::Medium,
            RiskLevel::High => Severity::High,
            RiskLevel::Critical => Severity::Critical,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = OversightError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(OversightError::Validation(format!(
                "Unknown risk level: {}. Must be low, medium, high or critical",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    /// Replaced by a successor request one tier higher.
    EscalatedFurther,
    Expired,
}

impl ApprovalStatus {
    pub const ALL: [ApprovalStatus; 5] = [
        ApprovalStatus::Pending,
        ApprovalStatus::Approved,
        ApprovalStatus::Rejected,
        ApprovalStatus::EscalatedFurther,
        ApprovalStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::EscalatedFurther => "escalated_further",
            ApprovalStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    RequestChanges,
    Escalate,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
            Decision::RequestChanges => "request_changes",
            Decision::Escalate => "escalate",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = OversightError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "approve" => Ok(Decision::Approve),
            "reject" => Ok(Decision::Reject),
            "request_changes" => Ok(Decision::RequestChanges),
            "escalate" => Ok(Decision::Escalate),
            other => Err(OversightError::Validation(format!("Unknown decision: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub approver_id: String,
    pub decision: Decision,
    pub timestamp: DateTime<Utc>,
    pub comments: Option<String>,
}

/// A gated action awaiting a quorum of approvers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub workflow_type: String,
    pub risk_level: RiskLevel,
    pub status: ApprovalStatus,
    pub requested_by: String,
    pub target_entity_type: String,
    pub target_entity_id: String,
    pub action_details: Snapshot,
    pub reason: String,
    pub estimated_impact: Option<String>,
    pub required_approvers: BTreeSet<String>,
    pub required_approval_count: usize,
    pub approvals: Vec<DecisionRecord>,
    pub rejections: Vec<DecisionRecord>,
    pub change_requests: Vec<DecisionRecord>,
    pub escalations: Vec<DecisionRecord>,
    pub created_at: DateTime<Utc>,
    pub sla_deadline: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub parent_request_id: Option<String>,
    pub escalated_to: Option<String>,
}

impl ApprovalRequest {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Pending past its SLA deadline. Authoritative even before `Expired`
    /// has been materialized.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now > self.sla_deadline
    }

    /// Hours until the deadline; negative once overdue.
    pub fn hours_remaining(&self, now: DateTime<Utc>) -> f64 {
        (self.sla_deadline - now).num_seconds() as f64 / 3600.0
    }

    pub fn has_approved(&self, approver_id: &str) -> bool {
        self.approvals.iter().any(|d| d.approver_id == approver_id)
    }

    pub fn distinct_approvers(&self) -> BTreeSet<&str> {
        self.approvals.iter().map(|d| d.approver_id.as_str()).collect()
    }

    /// (distinct approvals so far, approvals required)
    pub fn approval_progress(&self) -> (usize, usize) {
        (self.distinct_approvers().len(), self.required_approval_count)
    }

    /// Every recorded decision, in no particular order across kinds.
    pub fn all_decisions(&self) -> impl Iterator<Item = &DecisionRecord> {
        self.approvals
            .iter()
            .chain(&self.rejections)
            .chain(&self.change_requests)
            .chain(&self.escalations)
    }

    /// Compact state used as before/after snapshots in the audit ledger.
    pub fn state_snapshot(&self) -> Result<Snapshot> {
        let (approved, required) = self.approval_progress();
        Snapshot::new(json!({
            "status": self.status.as_str(),
            "risk_level": self.risk_level.as_str(),
            "approvals": approved,
            "required_approvals": required,
            "rejections": self.rejections.len(),
            "change_requests": self.change_requests.len(),
            "sla_deadline": self.sla_deadline.to_rfc3339(),
            "parent_request_id": self.parent_request_id,
            "escalated_to": self.escalated_to,
        }))
    }
}

/// Input to `ApprovalEngine::create_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewApprovalRequest {
    pub workflow_type: String,
    pub risk_level: RiskLevel,
    pub requested_by: String,
    pub target_entity_type: String,
    pub target_entity_id: String,
    pub action_details: Snapshot,
    pub required_approvers: Vec<String>,
    pub reason: String,
    #[serde(default)]
    pub estimated_impact: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingFilter {
    pub assigned_to: Option<String>,
    pub workflow_type: Option<String>,
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub include_past_due: bool,
}

impl PendingFilter {
    pub fn matches(&self, request: &ApprovalRequest) -> bool {
        self.assigned_to
            .as_deref()
            .map_or(true, |a| request.required_approvers.contains(a))
            && self
                .workflow_type
                .as_deref()
                .map_or(true, |w| request.workflow_type == w)
            && self.risk_level.map_or(true, |r| request.risk_level == r)
    }
}

/// A pending request together with its SLA view at listing time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRequest {
    #[serde(flatten)]
    pub request: ApprovalRequest,
    pub is_overdue: bool,
    pub hours_remaining: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_ladder() {
        assert_eq!(RiskLevel::Low.escalated(), RiskLevel::Medium);
        assert_eq!(RiskLevel::Medium.escalated(), RiskLevel::High);
        assert_eq!(RiskLevel::High.escalated(), RiskLevel::Critical);
        assert_eq!(RiskLevel::Critical.escalated(), RiskLevel::Critical);
    }

    #[test]
    fn test_unknown_risk_level_is_validation_error() {
        assert_eq!("Critical".parse::<RiskLevel>().unwrap(), RiskLevel::Critical);
        assert!(matches!(
            "severe".parse::<RiskLevel>(),
            Err(OversightError::Validation(_))
        ));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ApprovalStatus::Pending.is_terminal());
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(ApprovalStatus::EscalatedFurther.is_terminal());
        assert!(ApprovalStatus::Expired.is_terminal());
    }

    #[test]
    fn test_decision_parse() {
        assert_eq!("request_changes".parse::<Decision>().unwrap(), Decision::RequestChanges);
        assert!("maybe".parse::<Decision>().is_err());
    }
}
