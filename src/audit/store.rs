//! Ledger storage seam.
//!
//! A store only persists and returns records; sequencing, hashing and
//! chain validation live in `AuditLedger`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::audit::query::{LedgerQuery, QueryPage};
use crate::audit::record::AuditRecord;
use crate::error::{OversightError, Result};

/// A stored entry that no longer decodes as an `AuditRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedEntry {
    /// 1-based position in append order (file line or table row).
    pub position: usize,
    pub record_id: Option<String>,
    pub sequence: Option<u64>,
    pub record_hash: Option<String>,
    pub error: String,
}

impl MalformedEntry {
    /// Keep whichever identifying fields still parse out of `raw`.
    pub fn from_raw(position: usize, raw: &str, error: impl ToString) -> Self {
        let value: Option<Value> = serde_json::from_str(raw).ok();
        let field = |name: &str| value.as_ref().and_then(|v| v.get(name));

        Self {
            position,
            record_id: field("id").and_then(Value::as_str).map(str::to_string),
            sequence: field("sequence").and_then(Value::as_u64),
            record_hash: field("record_hash").and_then(Value::as_str).map(str::to_string),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoredEntry {
    Record(AuditRecord),
    Malformed(MalformedEntry),
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist a sealed record. Must reject a duplicate id or sequence.
    async fn append(&self, record: &AuditRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<AuditRecord>>;

    /// Most recently appended record.
    async fn last(&self) -> Result<Option<AuditRecord>>;

    async fn query(&self, query: &LedgerQuery) -> Result<QueryPage>;

    /// Every record in append order.
    async fn scan(&self) -> Result<Vec<AuditRecord>>;

    /// Every entry in append order, keeping those that fail to decode.
    /// Only an unreadable store is an error here.
    async fn scan_entries(&self) -> Result<Vec<StoredEntry>> {
        Ok(self.scan().await?.into_iter().map(StoredEntry::Record).collect())
    }

    async fn count(&self) -> Result<u64>;
}

#[derive(Default)]
struct MemoryLedger {
    records: Vec<AuditRecord>,
    index: HashMap<String, usize>,
}

/// In-process store used by tests and single-node deployments.
#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: RwLock<MemoryLedger>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored record in place, bypassing the append-only contract.
    #[cfg(test)]
    pub(crate) async fn tamper<F: FnOnce(&mut AuditRecord)>(&self, id: &str, f: F) {
        let mut inner = self.inner.write().await;
        let idx = inner.index.get(id).copied();
        if let Some(idx) = idx {
            f(&mut inner.records[idx]);
        }
    }

    #[cfg(test)]
    pub(crate) async fn remove(&self, id: &str) {
        let mut inner = self.inner.write().await;
        inner.records.retain(|r| r.id != id);
        let rebuilt: HashMap<String, usize> = inner
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        inner.index = rebuilt;
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.index.contains_key(&record.id) {
            return Err(OversightError::InvalidState(format!(
                "Record {} already exists",
                record.id
            )));
        }
        if let Some(last) = inner.records.last() {
            if record.sequence <= last.sequence {
                return Err(OversightError::InvalidState(format!(
                    "Sequence {} does not follow {}",
                    record.sequence, last.sequence
                )));
            }
        }
        let idx = inner.records.len();
        inner.index.insert(record.id.clone(), idx);
        inner.records.push(record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<AuditRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.index.get(id).map(|&idx| inner.records[idx].clone()))
    }

    async fn last(&self) -> Result<Option<AuditRecord>> {
        Ok(self.inner.read().await.records.last().cloned())
    }

    async fn query(&self, query: &LedgerQuery) -> Result<QueryPage> {
        let inner = self.inner.read().await;
        Ok(query.apply(inner.records.iter()))
    }

    async fn scan(&self) -> Result<Vec<AuditRecord>> {
        Ok(self.inner.read().await.records.clone())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.inner.read().await.records.len() as u64)
    }
}
