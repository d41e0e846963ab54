//! Approval request storage seam.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::{OversightError, Result};
use crate::workflow::types::{ApprovalRequest, ApprovalStatus};

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert(&self, request: &ApprovalRequest) -> Result<()>;

    /// Replace an existing request; `NotFound` if it was never inserted.
    async fn update(&self, request: &ApprovalRequest) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<ApprovalRequest>>;

    /// All requests, optionally restricted to one status, oldest first.
    async fn list(&self, status: Option<ApprovalStatus>) -> Result<Vec<ApprovalRequest>>;
}

#[derive(Default)]
pub struct MemoryApprovalStore {
    requests: RwLock<BTreeMap<String, ApprovalRequest>>,
}

impl MemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for MemoryApprovalStore {
    async fn insert(&self, request: &ApprovalRequest) -> Result<()> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id) {
            return Err(OversightError::InvalidState(format!(
                "Approval request {} already exists",
                request.id
            )));
        }
        requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn update(&self, request: &ApprovalRequest) -> Result<()> {
        let mut requests = self.requests.write().await;
        match requests.get_mut(&request.id) {
            Some(existing) => {
                *existing = request.clone();
                Ok(())
            }
            None => Err(OversightError::not_found("approval request", &request.id)),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<ApprovalRequest>> {
        Ok(self.requests.read().await.get(id).cloned())
    }

    async fn list(&self, status: Option<ApprovalStatus>) -> Result<Vec<ApprovalRequest>> {
        let requests = self.requests.read().await;
        let mut matched: Vec<ApprovalRequest> = requests
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matched)
    }
}
