//! Workflow Alerts
//!
//! Notifications emitted by the approval engine. Delivery happens after the
//! engine's write lock is released; a sink must never block for long.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::workflow::types::RiskLevel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowAlert {
    RequestCreated {
        request_id: String,
        risk_level: RiskLevel,
        approvers: Vec<String>,
    },
    QuorumReached {
        request_id: String,
        approvals: usize,
    },
    RequestRejected {
        request_id: String,
        rejected_by: String,
    },
    ChangesRequested {
        request_id: String,
        requested_by: String,
    },
    RequestEscalated {
        request_id: String,
        successor_id: String,
        risk_level: RiskLevel,
    },
    RequestExpired {
        request_id: String,
    },
}

impl WorkflowAlert {
    pub fn request_id(&self) -> &str {
        match self {
            WorkflowAlert::RequestCreated { request_id, .. }
            | WorkflowAlert::QuorumReached { request_id, .. }
            | WorkflowAlert::RequestRejected { request_id, .. }
            | WorkflowAlert::ChangesRequested { request_id, .. }
            | WorkflowAlert::RequestEscalated { request_id, .. }
            | WorkflowAlert::RequestExpired { request_id } => request_id,
        }
    }
}

pub trait AlertSink: Send + Sync {
    fn deliver(&self, alert: WorkflowAlert);
}

/// Emits each alert as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn deliver(&self, alert: WorkflowAlert) {
        info!(request_id = alert.request_id(), alert = ?alert, "Workflow alert");
    }
}

/// Forwards alerts to a channel drained by an external notifier task.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    sender: mpsc::UnboundedSender<WorkflowAlert>,
}

impl ChannelAlertSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkflowAlert>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl AlertSink for ChannelAlertSink {
    fn deliver(&self, alert: WorkflowAlert) {
        if let Err(e) = self.sender.send(alert) {
            warn!("Alert receiver dropped, discarding alert for {}", e.0.request_id());
        }
    }
}
