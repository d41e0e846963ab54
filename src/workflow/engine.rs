//! Approval Workflow Engine
//!
//! Gates high-risk actions behind an N-of-M quorum within an SLA window.
//! Creates, decisions and expiries are serialized by one write lock; each
//! transition is appended to the audit ledger before it is persisted, and
//! alerts go out only after the lock is released.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::audit::ledger::AuditLedger;
use crate::audit::query::TimeRange;
use crate::audit::record::{AuditRecord, RecordDraft, Severity};
use crate::clock::{Clock, IdGenerator, UuidGenerator};
use crate::error::{OversightError, Result};
use crate::workflow::alerts::{AlertSink, LogAlertSink, WorkflowAlert};
use crate::workflow::policy::ApprovalPolicy;
use crate::workflow::store::ApprovalStore;
use crate::workflow::types::{
    ApprovalRequest, ApprovalStatus, Decision, DecisionRecord, NewApprovalRequest, PendingFilter,
    PendingRequest,
};

pub const WORKFLOW_CATEGORY: &str = "approval_workflow";
pub const REQUEST_ENTITY: &str = "approval_request";
pub const SWEEP_ACTOR: &str = "system:sla-sweep";

/// Ledger action tags for workflow transitions.
pub mod actions {
    pub const REQUEST_CREATED: &str = "approval.request_created";
    pub const APPROVAL_RECORDED: &str = "approval.approval_recorded";
    pub const APPROVED: &str = "approval.approved";
    pub const REJECTED: &str = "approval.rejected";
    pub const CHANGES_REQUESTED: &str = "approval.changes_requested";
    pub const ESCALATED: &str = "approval.escalated";
    pub const EXPIRED: &str = "approval.expired";
    pub const PERSIST_FAILED: &str = "approval.persist_failed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepAction {
    Expire,
    Escalate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationLink {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub expired: Vec<String>,
    pub escalated: Vec<EscalationLink>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub total_requests: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_risk: BTreeMap<String, usize>,
    pub terminal_count: usize,
    pub overdue_count: usize,
    /// Approved share of terminal requests, 0.0..=1.0.
    pub approval_rate: Option<f64>,
    pub mean_time_to_terminal_secs: Option<f64>,
}

pub struct ApprovalEngine {
    store: Arc<dyn ApprovalStore>,
    ledger: Arc<AuditLedger>,
    policy: ApprovalPolicy,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    alerts: Arc<dyn AlertSink>,
    write_lock: Mutex<()>,
}

impl ApprovalEngine {
    /// Engine sharing the ledger's clock, logging alerts.
    pub fn new(store: Arc<dyn ApprovalStore>, ledger: Arc<AuditLedger>, policy: ApprovalPolicy) -> Self {
        let clock = ledger.clock();
        Self {
            store,
            ledger,
            policy,
            clock,
            ids: Arc::new(UuidGenerator),
            alerts: Arc::new(LogAlertSink),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    pub async fn create_request(&self, new: NewApprovalRequest) -> Result<ApprovalRequest> {
        for (field, value) in [
            ("workflow_type", &new.workflow_type),
            ("requested_by", &new.requested_by),
            ("target_entity_type", &new.target_entity_type),
            ("target_entity_id", &new.target_entity_id),
            ("reason", &new.reason),
        ] {
            if value.trim().is_empty() {
                return Err(OversightError::empty_field(field));
            }
        }

        let approvers: BTreeSet<String> = new
            .required_approvers
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        if approvers.is_empty() {
            return Err(OversightError::empty_field("required_approvers"));
        }

        let tier = self.policy.tier(new.risk_level);
        if approvers.len() < tier.required_approvals {
            warn!(
                "Only {} eligible approvers for a {} request needing {}; quorum is unreachable without escalation",
                approvers.len(),
                new.risk_level,
                tier.required_approvals
            );
        }

        let guard = self.write_lock.lock().await;
        let now = self.clock.now();

        let request = ApprovalRequest {
            id: self.ids.next_id(),
            workflow_type: new.workflow_type,
            risk_level: new.risk_level,
            status: ApprovalStatus::Pending,
            requested_by: new.requested_by,
            target_entity_type: new.target_entity_type,
            target_entity_id: new.target_entity_id,
            action_details: new.action_details,
            reason: new.reason,
            estimated_impact: new.estimated_impact,
            required_approvers: approvers,
            required_approval_count: tier.required_approvals,
            approvals: Vec::new(),
            rejections: Vec::new(),
            change_requests: Vec::new(),
            escalations: Vec::new(),
            created_at: now,
            sla_deadline: now + tier.sla(),
            resolved_at: None,
            parent_request_id: None,
            escalated_to: None,
        };

        self.record_transition(
            &request.requested_by,
            actions::REQUEST_CREATED,
            None,
            &request,
            &request.reason,
        )
        .await?;
        self.persist(&request, true, &request.requested_by).await?;
        drop(guard);

        info!(
            "Created {} approval request {} ({} of {} approvers, due {})",
            request.risk_level,
            request.id,
            request.required_approval_count,
            request.required_approvers.len(),
            request.sla_deadline
        );

        self.alerts.deliver(WorkflowAlert::RequestCreated {
            request_id: request.id.clone(),
            risk_level: request.risk_level,
            approvers: request.required_approvers.iter().cloned().collect(),
        });

        Ok(request)
    }

    pub async fn submit_decision(
        &self,
        request_id: &str,
        approver_id: &str,
        decision: Decision,
        comments: Option<String>,
    ) -> Result<ApprovalRequest> {
        let guard = self.write_lock.lock().await;
        let mut request = self.load(request_id).await?;

        if request.is_terminal() {
            return Err(OversightError::InvalidState(format!(
                "Request {} is already {}",
                request.id, request.status
            )));
        }

        if !request.required_approvers.contains(approver_id) {
            warn!("Rejected decision from undesignated approver {} on {}", approver_id, request.id);
            return Err(OversightError::UnauthorizedApprover {
                approver_id: approver_id.to_string(),
                request_id: request.id.clone(),
            });
        }

        let now = self.clock.now();
        if request.is_overdue(now) && matches!(decision, Decision::Approve | Decision::RequestChanges) {
            return Err(OversightError::InvalidState(format!(
                "Request {} is past its SLA deadline ({}); only reject or escalate are accepted",
                request.id, request.sla_deadline
            )));
        }

        if decision == Decision::Approve && request.has_approved(approver_id) {
            debug!("Duplicate approval from {} on {} ignored", approver_id, request.id);
            return Ok(request);
        }

        let reason = comments
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} by {}", decision, approver_id));
        let entry = DecisionRecord {
            approver_id: approver_id.to_string(),
            decision,
            timestamp: now,
            comments,
        };
        let before = request.clone();

        let mut alerts = Vec::new();
        match decision {
            Decision::Approve => {
                request.approvals.push(entry);
                let (approved, required) = request.approval_progress();
                let action = if approved >= required {
                    request.status = ApprovalStatus::Approved;
                    request.resolved_at = Some(now);
                    alerts.push(WorkflowAlert::QuorumReached {
                        request_id: request.id.clone(),
                        approvals: approved,
                    });
                    actions::APPROVED
                } else {
                    actions::APPROVAL_RECORDED
                };

                self.record_transition(approver_id, action, Some(&before), &request, &reason)
                    .await?;
                self.persist(&request, false, approver_id).await?;
                info!(
                    "{} on {} from {}",
                    self.policy.format_threshold_status(request.risk_level, approved),
                    request.id,
                    approver_id
                );
            }
            Decision::Reject => {
                request.rejections.push(entry);
                request.status = ApprovalStatus::Rejected;
                request.resolved_at = Some(now);

                self.record_transition(approver_id, actions::REJECTED, Some(&before), &request, &reason)
                    .await?;
                self.persist(&request, false, approver_id).await?;
                info!("Request {} rejected by {}", request.id, approver_id);

                alerts.push(WorkflowAlert::RequestRejected {
                    request_id: request.id.clone(),
                    rejected_by: approver_id.to_string(),
                });
            }
            Decision::RequestChanges => {
                request.change_requests.push(entry);

                self.record_transition(
                    approver_id,
                    actions::CHANGES_REQUESTED,
                    Some(&before),
                    &request,
                    &reason,
                )
                .await?;
                self.persist(&request, false, approver_id).await?;

                alerts.push(WorkflowAlert::ChangesRequested {
                    request_id: request.id.clone(),
                    requested_by: approver_id.to_string(),
                });
            }
            Decision::Escalate => {
                request.escalations.push(entry);
                let successor = self.escalate(&mut request, &before, approver_id, &reason, now).await?;
                alerts.push(WorkflowAlert::RequestEscalated {
                    request_id: request.id.clone(),
                    successor_id: successor.id,
                    risk_level: successor.risk_level,
                });
            }
        }
        drop(guard);

        for alert in alerts {
            self.alerts.deliver(alert);
        }
        Ok(request)
    }

    /// Mark `request` escalated and create its successor one tier up.
    /// Caller holds the write lock.
    async fn escalate(
        &self,
        request: &mut ApprovalRequest,
        before: &ApprovalRequest,
        actor: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest> {
        let risk_level = request.risk_level.escalated();
        let tier = self.policy.tier(risk_level);

        let successor = ApprovalRequest {
            id: self.ids.next_id(),
            workflow_type: request.workflow_type.clone(),
            risk_level,
            status: ApprovalStatus::Pending,
            requested_by: request.requested_by.clone(),
            target_entity_type: request.target_entity_type.clone(),
            target_entity_id: request.target_entity_id.clone(),
            action_details: request.action_details.clone(),
            reason: request.reason.clone(),
            estimated_impact: request.estimated_impact.clone(),
            required_approvers: request.required_approvers.clone(),
            required_approval_count: tier.required_approvals,
            approvals: Vec::new(),
            rejections: Vec::new(),
            change_requests: Vec::new(),
            escalations: Vec::new(),
            created_at: now,
            sla_deadline: now + tier.sla(),
            resolved_at: None,
            parent_request_id: Some(request.id.clone()),
            escalated_to: None,
        };

        request.status = ApprovalStatus::EscalatedFurther;
        request.resolved_at = Some(now);
        request.escalated_to = Some(successor.id.clone());

        self.record_transition(actor, actions::ESCALATED, Some(before), request, reason)
            .await?;
        self.record_transition(
            actor,
            actions::REQUEST_CREATED,
            None,
            &successor,
            &format!("Escalated from {}: {}", request.id, reason),
        )
        .await?;

        // Parent first: a failed write must never leave two live requests.
        self.persist(request, false, actor).await?;
        if let Err(e) = self.persist(&successor, true, actor).await {
            match self.store.update(before).await {
                Ok(()) => warn!(
                    "Rolled back escalation of {} after losing successor {}",
                    request.id, successor.id
                ),
                Err(rollback_err) => error!(
                    "Request {} is escalated to missing successor {}: rollback failed: {}",
                    request.id, successor.id, rollback_err
                ),
            }
            return Err(e);
        }

        info!(
            "Request {} escalated to {} ({} -> {})",
            request.id, successor.id, before.risk_level, successor.risk_level
        );
        Ok(successor)
    }

    /// Materialize `Expired` on a pending request past its deadline.
    pub async fn expire_request(&self, request_id: &str, actor: &str) -> Result<ApprovalRequest> {
        let guard = self.write_lock.lock().await;
        let mut request = self.load(request_id).await?;
        let now = self.clock.now();

        if request.status != ApprovalStatus::Pending {
            return Err(OversightError::InvalidState(format!(
                "Request {} is already {}",
                request.id, request.status
            )));
        }
        if !request.is_overdue(now) {
            return Err(OversightError::InvalidState(format!(
                "Request {} is not past its SLA deadline ({})",
                request.id, request.sla_deadline
            )));
        }

        let before = request.clone();
        request.status = ApprovalStatus::Expired;
        request.resolved_at = Some(now);

        self.record_transition(
            actor,
            actions::EXPIRED,
            Some(&before),
            &request,
            &format!("SLA deadline {} passed", request.sla_deadline),
        )
        .await?;
        self.persist(&request, false, actor).await?;
        drop(guard);

        info!("Request {} expired", request.id);
        self.alerts.deliver(WorkflowAlert::RequestExpired {
            request_id: request.id.clone(),
        });
        Ok(request)
    }

    /// Escalate a pending request past its deadline on behalf of a scheduler.
    /// Skips the designated-approver check.
    pub async fn escalate_overdue(&self, request_id: &str, actor: &str) -> Result<ApprovalRequest> {
        let guard = self.write_lock.lock().await;
        let mut request = self.load(request_id).await?;
        let now = self.clock.now();

        if !request.is_overdue(now) {
            return Err(OversightError::InvalidState(format!(
                "Request {} is not an overdue pending request",
                request.id
            )));
        }

        let before = request.clone();
        let reason = format!("SLA deadline {} passed", request.sla_deadline);
        request.escalations.push(DecisionRecord {
            approver_id: actor.to_string(),
            decision: Decision::Escalate,
            timestamp: now,
            comments: Some(reason.clone()),
        });
        let successor = self.escalate(&mut request, &before, actor, &reason, now).await?;
        drop(guard);

        self.alerts.deliver(WorkflowAlert::RequestEscalated {
            request_id: request.id.clone(),
            successor_id: successor.id.clone(),
            risk_level: successor.risk_level,
        });
        Ok(successor)
    }

    /// Scheduler contract: list pending requests including past-due ones
    /// and expire or escalate each overdue request.
    pub async fn sweep_overdue(&self, action: SweepAction, actor: &str) -> Result<SweepOutcome> {
        let pending = self
            .list_pending(&PendingFilter {
                include_past_due: true,
                ..Default::default()
            })
            .await?;

        let mut outcome = SweepOutcome::default();
        for item in pending.into_iter().filter(|p| p.is_overdue) {
            let id = item.request.id;
            let result = match action {
                SweepAction::Expire => self.expire_request(&id, actor).await.map(|_| None),
                SweepAction::Escalate => self.escalate_overdue(&id, actor).await.map(Some),
            };

            match result {
                Ok(None) => outcome.expired.push(id),
                Ok(Some(successor)) => outcome.escalated.push(EscalationLink {
                    from: id,
                    to: successor.id,
                }),
                // Decided concurrently between listing and acting.
                Err(OversightError::InvalidState(msg)) => {
                    debug!("Sweep skipped {}: {}", id, msg);
                    outcome.skipped.push(id);
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "SLA sweep: {} expired, {} escalated, {} skipped",
            outcome.expired.len(),
            outcome.escalated.len(),
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    /// Pending requests: overdue first, then highest risk, then oldest.
    pub async fn list_pending(&self, filter: &PendingFilter) -> Result<Vec<PendingRequest>> {
        let now = self.clock.now();
        let mut pending: Vec<PendingRequest> = self
            .store
            .list(Some(ApprovalStatus::Pending))
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
            .map(|request| PendingRequest {
                is_overdue: request.is_overdue(now),
                hours_remaining: request.hours_remaining(now),
                request,
            })
            .filter(|p| filter.include_past_due || !p.is_overdue)
            .collect();

        pending.sort_by(|a, b| {
            b.is_overdue
                .cmp(&a.is_overdue)
                .then_with(|| b.request.risk_level.cmp(&a.request.risk_level))
                .then_with(|| a.request.created_at.cmp(&b.request.created_at))
        });
        Ok(pending)
    }

    pub async fn get_request(&self, request_id: &str) -> Result<ApprovalRequest> {
        self.load(request_id).await
    }

    /// The request, then its ancestors nearest-first, then its descendants
    /// nearest-first.
    pub async fn get_chain(&self, request_id: &str) -> Result<Vec<ApprovalRequest>> {
        let origin = self.load(request_id).await?;
        let mut seen: HashSet<String> = HashSet::from([origin.id.clone()]);
        let mut chain = vec![origin.clone()];

        let mut cursor = origin.parent_request_id.clone();
        while let Some(id) = cursor {
            if !seen.insert(id.clone()) {
                break;
            }
            match self.store.get(&id).await? {
                Some(parent) => {
                    cursor = parent.parent_request_id.clone();
                    chain.push(parent);
                }
                None => {
                    warn!("Chain of {} references missing ancestor {}", request_id, id);
                    break;
                }
            }
        }

        let mut cursor = origin.escalated_to.clone();
        while let Some(id) = cursor {
            if !seen.insert(id.clone()) {
                break;
            }
            match self.store.get(&id).await? {
                Some(child) => {
                    cursor = child.escalated_to.clone();
                    chain.push(child);
                }
                None => {
                    warn!("Chain of {} references missing successor {}", request_id, id);
                    break;
                }
            }
        }

        Ok(chain)
    }

    pub async fn list_requests(&self, status: Option<ApprovalStatus>) -> Result<Vec<ApprovalRequest>> {
        self.store.list(status).await
    }

    /// Counts over requests created within `range`.
    pub async fn summarize(&self, range: Option<TimeRange>) -> Result<WorkflowSummary> {
        let range = range.unwrap_or_default();
        let now = self.clock.now();
        let requests: Vec<ApprovalRequest> = self
            .store
            .list(None)
            .await?
            .into_iter()
            .filter(|r| range.contains(r.created_at))
            .collect();

        let mut summary = WorkflowSummary {
            total_requests: requests.len(),
            ..Default::default()
        };

        let mut approved = 0usize;
        let mut resolution_secs = Vec::new();
        for request in &requests {
            *summary.by_status.entry(request.status.as_str().to_string()).or_default() += 1;
            *summary.by_risk.entry(request.risk_level.as_str().to_string()).or_default() += 1;

            if request.is_overdue(now) {
                summary.overdue_count += 1;
            }
            if request.is_terminal() {
                summary.terminal_count += 1;
                if request.status == ApprovalStatus::Approved {
                    approved += 1;
                }
                if let Some(resolved_at) = request.resolved_at {
                    resolution_secs.push((resolved_at - request.created_at).num_milliseconds() as f64 / 1000.0);
                }
            }
        }

        if summary.terminal_count > 0 {
            summary.approval_rate = Some(approved as f64 / summary.terminal_count as f64);
        }
        if !resolution_secs.is_empty() {
            summary.mean_time_to_terminal_secs =
                Some(resolution_secs.iter().sum::<f64>() / resolution_secs.len() as f64);
        }

        Ok(summary)
    }

    async fn load(&self, request_id: &str) -> Result<ApprovalRequest> {
        self.store
            .get(request_id)
            .await?
            .ok_or_else(|| OversightError::not_found("approval request", request_id))
    }

    async fn record_transition(
        &self,
        actor: &str,
        action: &str,
        before: Option<&ApprovalRequest>,
        after: &ApprovalRequest,
        reason: &str,
    ) -> Result<AuditRecord> {
        let mut draft = RecordDraft::new(actor, action, WORKFLOW_CATEGORY)
            .entity(REQUEST_ENTITY, &after.id)
            .severity(after.risk_level.severity())
            .reason(reason)
            .after(after.state_snapshot()?)
            .meta("workflow_type", &after.workflow_type)
            .meta("risk_level", after.risk_level)
            .meta("status", after.status)
            .meta("target", format!("{}:{}", after.target_entity_type, after.target_entity_id));
        if let Some(before) = before {
            draft = draft.before(before.state_snapshot()?);
        }
        if let Some(parent) = &after.parent_request_id {
            draft = draft.meta("parent_request_id", parent);
        }
        self.ledger.append(draft).await
    }

    /// Persist a transition already on the ledger. A storage failure is
    /// itself recorded as a failed action before the error is returned.
    async fn persist(&self, request: &ApprovalRequest, insert: bool, actor: &str) -> Result<()> {
        let result = if insert {
            self.store.insert(request).await
        } else {
            self.store.update(request).await
        };

        if let Err(e) = &result {
            error!("Failed to persist approval request {}: {}", request.id, e);
            let draft = RecordDraft::new(actor, actions::PERSIST_FAILED, WORKFLOW_CATEGORY)
                .entity(REQUEST_ENTITY, &request.id)
                .severity(Severity::High)
                .meta("intended_status", request.status);
            if let Err(audit_err) = self
                .ledger
                .append_failure(draft, &format!("Failed to persist transition: {}", e))
                .await
            {
                error!("Could not record persistence failure for {}: {}", request.id, audit_err);
            }
        }
        result
    }
}
