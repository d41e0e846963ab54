//! Approval Workflow Engine
//!
//! Quorum- and SLA-gated approval of high-risk administrative actions.
//! Every transition lands on the audit ledger before it is persisted.

pub mod alerts;
pub mod engine;
pub mod policy;
pub mod sqlite_store;
pub mod store;
pub mod types;

pub use alerts::{AlertSink, ChannelAlertSink, LogAlertSink, WorkflowAlert};
pub use engine::{ApprovalEngine, EscalationLink, SweepAction, SweepOutcome, WorkflowSummary};
pub use policy::{ApprovalPolicy, TierOverride, TierPolicy};
pub use sqlite_store::SqliteApprovalStore;
pub use store::{ApprovalStore, MemoryApprovalStore};
pub use types::{
    ApprovalRequest, ApprovalStatus, Decision, DecisionRecord, NewApprovalRequest, PendingFilter,
    PendingRequest, RiskLevel,
};
