#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use oversight::audit::{AuditLedger, LedgerStore, MemoryLedgerStore, RecordDraft, Severity};
use oversight::canonical::Snapshot;
use oversight::clock::{ManualClock, SequentialIds};
use oversight::workflow::{
    ApprovalEngine, ApprovalPolicy, ApprovalStore, ChannelAlertSink, MemoryApprovalStore,
    NewApprovalRequest, RiskLevel, WorkflowAlert,
};

/// Fixed start instant for every scenario
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
}

pub fn test_clock() -> ManualClock {
    ManualClock::new(epoch())
}

/// Ledger over `store` with deterministic ids
pub async fn ledger_over(store: Arc<dyn LedgerStore>, clock: &ManualClock) -> Arc<AuditLedger> {
    Arc::new(
        AuditLedger::open(store, Arc::new(clock.clone()), Arc::new(SequentialIds::new("rec")))
            .await
            .expect("Failed to open ledger"),
    )
}

pub struct Oversight {
    pub clock: ManualClock,
    pub ledger: Arc<AuditLedger>,
    pub engine: Arc<ApprovalEngine>,
    pub alerts: UnboundedReceiver<WorkflowAlert>,
}

/// In-memory ledger and engine sharing one manual clock
pub async fn setup_oversight() -> Oversight {
    setup_with_stores(
        Arc::new(MemoryLedgerStore::new()),
        Arc::new(MemoryApprovalStore::new()),
    )
    .await
}

pub async fn setup_with_stores(
    ledger_store: Arc<dyn LedgerStore>,
    approval_store: Arc<dyn ApprovalStore>,
) -> Oversight {
    let clock = test_clock();
    let ledger = ledger_over(ledger_store, &clock).await;
    let (sink, alerts) = ChannelAlertSink::new();
    let engine = ApprovalEngine::new(approval_store, ledger.clone(), ApprovalPolicy::default())
        .with_ids(Arc::new(SequentialIds::new("req")))
        .with_alerts(Arc::new(sink));

    Oversight {
        clock,
        ledger,
        engine: Arc::new(engine),
        alerts,
    }
}

pub fn price_ceiling_draft(actor: &str, product: &str, old: u64, new: u64) -> RecordDraft {
    RecordDraft::new(actor, "price_ceiling.update", "pricing")
        .entity("product", product)
        .before(Snapshot::new(json!({ "ceiling": old })).unwrap())
        .after(Snapshot::new(json!({ "ceiling": new })).unwrap())
        .severity(Severity::Medium)
        .reason("quarterly market adjustment")
}

pub fn seller_suspension(risk: RiskLevel, approvers: &[&str]) -> NewApprovalRequest {
    NewApprovalRequest {
        workflow_type: "seller_suspension".to_string(),
        risk_level: risk,
        requested_by: "ops-lead".to_string(),
        target_entity_type: "seller".to_string(),
        target_entity_id: "seller-42".to_string(),
        action_details: Snapshot::new(json!({ "suspend_days": 14, "notify": true })).unwrap(),
        required_approvers: approvers.iter().map(|a| a.to_string()).collect(),
        reason: "fraud score above threshold".to_string(),
        estimated_impact: Some("seller listings hidden".to_string()),
    }
}
