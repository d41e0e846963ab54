//! Audit Ledger
//!
//! Append-only, hash-chained ledger of privileged actions. All appends are
//! serialized through one chain-head lock so that sequence numbers and
//! `previous_hash` links follow the order in which callers observed their
//! appends completing. Reads go straight to the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::merkle::{merkle_root, LedgerCheckpoint};
use crate::audit::query::{LedgerQuery, QueryPage, TimeRange};
use crate::audit::record::{AuditRecord, RecordDraft, RecordStatus, Severity};
use crate::audit::store::{LedgerStore, MemoryLedgerStore};
use crate::audit::verify::{validate_entries, LedgerValidation, VerificationReport};
use crate::canonical::GENESIS_HASH;
use crate::clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::error::{OversightError, Result};

struct ChainHead {
    next_sequence: u64,
    head_hash: String,
    last_timestamp: Option<DateTime<Utc>>,
}

pub struct AuditLedger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    head: Mutex<ChainHead>,
}

impl AuditLedger {
    /// Open a ledger over `store`, restoring the chain head from its last record.
    pub async fn open(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        let head = match store.last().await? {
            Some(last) => {
                info!(
                    "Resuming ledger at sequence {} (head {})",
                    last.sequence + 1,
                    last.record_hash
                );
                ChainHead {
                    next_sequence: last.sequence + 1,
                    head_hash: last.record_hash,
                    last_timestamp: Some(last.timestamp),
                }
            }
            None => ChainHead {
                next_sequence: 0,
                head_hash: GENESIS_HASH.to_string(),
                last_timestamp: None,
            },
        };

        Ok(Self {
            store,
            clock,
            ids,
            head: Mutex::new(head),
        })
    }

    /// Empty in-memory ledger on the system clock.
    pub async fn in_memory() -> Result<Self> {
        Self::open(
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(SystemClock),
            Arc::new(UuidGenerator),
        )
        .await
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Record a completed action.
    pub async fn append(&self, draft: RecordDraft) -> Result<AuditRecord> {
        self.seal(draft, RecordStatus::Success).await
    }

    /// Record an action that was attempted but did not complete.
    /// Snapshots are never attached to failure records.
    pub async fn append_failure(
        &self,
        mut draft: RecordDraft,
        failure_reason: &str,
    ) -> Result<AuditRecord> {
        draft.before = None;
        draft.after = None;
        draft.reason = failure_reason.to_string();
        if draft.severity.is_none() {
            draft.severity = Some(Severity::Medium);
        }
        self.seal(draft, RecordStatus::Failed).await
    }

    async fn seal(&self, draft: RecordDraft, status: RecordStatus) -> Result<AuditRecord> {
        draft.validate()?;

        let before_hash = draft.before.as_ref().map(|s| s.content_hash()).transpose()?;
        let after_hash = draft.after.as_ref().map(|s| s.content_hash()).transpose()?;
        let id = self.ids.next_id();

        let mut head = self.head.lock().await;

        let now = self.clock.now();
        let timestamp = match head.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };

        let mut record = AuditRecord {
            id,
            sequence: head.next_sequence,
            action: draft.action,
            category: draft.category,
            actor_id: draft.actor_id,
            entity_type: draft.entity_type,
            entity_id: draft.entity_id,
            timestamp,
            severity: draft.severity.unwrap_or(Severity::Low),
            status,
            reason: draft.reason,
            notes: draft.notes,
            before_state: draft.before,
            after_state: draft.after,
            before_hash,
            after_hash,
            metadata: draft.metadata,
            previous_hash: head.head_hash.clone(),
            record_hash: String::new(),
        };
        record.record_hash = record.calculate_hash()?;

        self.store.append(&record).await?;

        head.next_sequence += 1;
        head.head_hash = record.record_hash.clone();
        head.last_timestamp = Some(timestamp);
        drop(head);

        debug!("Appended audit record: {}", record.summary());
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Result<AuditRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| OversightError::not_found("audit record", id))
    }

    pub async fn query(&self, query: &LedgerQuery) -> Result<QueryPage> {
        self.store.query(query).await
    }

    /// Re-hash a stored record. Tampering is reported, not raised.
    pub async fn verify(&self, id: &str) -> Result<VerificationReport> {
        let record = self.get(id).await?;
        let report = VerificationReport::for_record(&record);
        if report.tampering_detected {
            warn!(
                "Tampering detected on record {}: expected {}, recomputed {}",
                id, report.expected_hash, report.recomputed_hash
            );
        }
        Ok(report)
    }

    /// Verify every record and every link in the chain, then check that
    /// the store still ends at the head this ledger last sealed.
    pub async fn validate(&self) -> Result<LedgerValidation> {
        let head = self.head.lock().await;
        let entries = self.store.scan_entries().await?;
        let mut validation = validate_entries(&entries);

        let expected = head
            .next_sequence
            .checked_sub(1)
            .map(|sequence| (sequence, head.head_hash.as_str()));
        validation.check_head(expected);
        Ok(validation)
    }

    pub async fn summarize(&self, range: Option<TimeRange>) -> Result<LedgerSummary> {
        let range = range.unwrap_or_default();
        let records: Vec<AuditRecord> = self
            .store
            .scan()
            .await?
            .into_iter()
            .filter(|r| range.contains(r.timestamp))
            .collect();
        Ok(LedgerSummary::from_records(&records))
    }

    /// Merkle root and head hash of the current ledger, `None` when empty.
    pub async fn checkpoint(&self) -> Result<Option<LedgerCheckpoint>> {
        let records = self.store.scan().await?;
        let leaves: Vec<String> = records.iter().map(|r| r.record_hash.clone()).collect();

        Ok(merkle_root(&leaves).map(|root| LedgerCheckpoint {
            record_count: records.len(),
            head_hash: leaves.last().cloned().unwrap_or_default(),
            merkle_root: root,
            taken_at: self.clock.now(),
        }))
    }

    pub async fn head_hash(&self) -> String {
        self.head.lock().await.head_hash.clone()
    }

    pub async fn len(&self) -> Result<u64> {
        self.store.count().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Aggregate counts over a set of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total_records: usize,
    pub by_action: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub by_actor: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub most_active_actor: Option<String>,
    pub highest_severity: Option<Severity>,
    pub highest_severity_action: Option<String>,
}

impl LedgerSummary {
    /// `records` in append order.
    pub fn from_records(records: &[AuditRecord]) -> Self {
        let mut summary = LedgerSummary {
            total_records: records.len(),
            ..Default::default()
        };

        for record in records {
            *summary.by_action.entry(record.action.clone()).or_default() += 1;
            *summary.by_category.entry(record.category.clone()).or_default() += 1;
            *summary
                .by_severity
                .entry(record.severity.as_str().to_string())
                .or_default() += 1;
            *summary.by_actor.entry(record.actor_id.clone()).or_default() += 1;
            *summary
                .by_status
                .entry(record.status.as_str().to_string())
                .or_default() += 1;
        }

        // Ties go to the lexicographically smallest actor.
        let mut best: Option<(&String, usize)> = None;
        for (actor, &count) in &summary.by_actor {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((actor, count));
            }
        }
        summary.most_active_actor = best.map(|(actor, _)| actor.clone());

        // Newest first; the first record at the top severity wins.
        let mut top: Option<&AuditRecord> = None;
        for record in records.iter().rev() {
            if top.map_or(true, |t| record.severity > t.severity) {
                top = Some(record);
            }
        }
        summary.highest_severity = top.map(|r| r.severity);
        summary.highest_severity_action = top.map(|r| r.action.clone());

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::verify::BreakKind;
    use crate::canonical::Snapshot;
    use crate::clock::{ManualClock, SequentialIds};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    async fn ledger_with_store() -> (AuditLedger, Arc<MemoryLedgerStore>, ManualClock) {
        let store = Arc::new(MemoryLedgerStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap());
        let ledger = AuditLedger::open(
            store.clone(),
            Arc::new(clock.clone()),
            Arc::new(SequentialIds::new("rec")),
        )
        .await
        .unwrap();
        (ledger, store, clock)
    }

    fn draft(actor: &str, action: &str, severity: Severity) -> RecordDraft {
        RecordDraft::new(actor, action, "seller_management")
            .entity("seller", "s-1")
            .severity(severity)
            .reason("routine review")
    }

    #[tokio::test]
    async fn test_append_chains_records() {
        let (ledger, _store, clock) = ledger_with_store().await;

        let first = ledger.append(draft("alice", "seller.approve", Severity::High)).await.unwrap();
        clock.advance(Duration::seconds(5));
        let second = ledger.append(draft("bob", "seller.suspend", Severity::Medium)).await.unwrap();

        assert_eq!(first.sequence, 0);
        assert_eq!(first.previous_hash, GENESIS_HASH);
        assert_eq!(second.sequence, 1);
        assert_eq!(second.previous_hash, first.record_hash);
        assert_eq!(ledger.head_hash().await, second.record_hash);
    }

    #[tokio::test]
    async fn test_snapshot_hashes_recorded() {
        let (ledger, _store, _clock) = ledger_with_store().await;
        let before = Snapshot::new(json!({"status": "pending"})).unwrap();
        let after = Snapshot::new(json!({"status": "approved"})).unwrap();

        let record = ledger
            .append(
                draft("alice", "seller.approve", Severity::High)
                    .before(before.clone())
                    .after(after.clone()),
            )
            .await
            .unwrap();

        assert_eq!(record.before_hash, Some(before.content_hash().unwrap()));
        assert_eq!(record.after_hash, Some(after.content_hash().unwrap()));
        assert!(ledger.verify(&record.id).await.unwrap().verified);
    }

    #[tokio::test]
    async fn test_append_failure_drops_snapshots() {
        let (ledger, _store, _clock) = ledger_with_store().await;
        let record = ledger
            .append_failure(
                draft("alice", "price.update", Severity::Low)
                    .after(Snapshot::new(json!({"ceiling": 10})).unwrap()),
                "upstream rejected the change",
            )
            .await
            .unwrap();

        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.reason, "upstream rejected the change");
        assert!(record.after_state.is_none());
        assert!(record.after_hash.is_none());
    }

    #[tokio::test]
    async fn test_append_rejects_empty_reason() {
        let (ledger, _store, _clock) = ledger_with_store().await;
        let result = ledger
            .append(RecordDraft::new("alice", "x", "y").entity("seller", "s-1"))
            .await;
        assert!(matches!(result, Err(OversightError::Validation(_))));
        assert_eq!(ledger.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_timestamps_never_go_backwards() {
        let (ledger, _store, clock) = ledger_with_store().await;
        let first = ledger.append(draft("alice", "a", Severity::Low)).await.unwrap();
        clock.advance(Duration::minutes(-10));
        let second = ledger.append(draft("alice", "b", Severity::Low)).await.unwrap();
        assert_eq!(second.timestamp, first.timestamp);
    }

    #[tokio::test]
    async fn test_verify_detects_tampering() {
        let (ledger, store, _clock) = ledger_with_store().await;
        let record = ledger.append(draft("alice", "seller.approve", Severity::High)).await.unwrap();

        store
            .tamper(&record.id, |r| r.reason = "nothing to see here".to_string())
            .await;

        let report = ledger.verify(&record.id).await.unwrap();
        assert!(!report.verified);
        assert!(report.tampering_detected);
        assert_eq!(report.expected_hash, record.record_hash);
    }

    #[tokio::test]
    async fn test_verify_unknown_id() {
        let (ledger, _store, _clock) = ledger_with_store().await;
        assert!(matches!(
            ledger.verify("missing").await,
            Err(OversightError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_detects_deletion() {
        let (ledger, store, clock) = ledger_with_store().await;
        let mut ids = Vec::new();
        for i in 0..4 {
            clock.advance(Duration::seconds(1));
            let r = ledger.append(draft("alice", &format!("a{}", i), Severity::Low)).await.unwrap();
            ids.push(r.id);
        }

        assert!(ledger.validate().await.unwrap().valid);

        store.remove(&ids[1]).await;
        let validation = ledger.validate().await.unwrap();
        assert!(!validation.valid);
        assert_eq!(validation.broken_record_ids, vec![ids[2].clone()]);
        assert!(validation.breaks.iter().any(|b| b.kind == BreakKind::SequenceGap));
    }

    #[tokio::test]
    async fn test_validate_detects_tail_truncation() {
        let (ledger, store, clock) = ledger_with_store().await;
        let mut ids = Vec::new();
        for i in 0..3 {
            clock.advance(Duration::seconds(1));
            let r = ledger.append(draft("alice", &format!("a{}", i), Severity::Low)).await.unwrap();
            ids.push(r.id);
        }

        store.remove(&ids[2]).await;
        let validation = ledger.validate().await.unwrap();
        assert!(!validation.valid);
        assert_eq!(validation.total_records, 2);
        assert_eq!(validation.missing_records, 1);
        assert!(validation.broken_record_ids.is_empty());
        assert!(validation
            .breaks
            .iter()
            .any(|b| b.kind == BreakKind::TruncatedTail && b.sequence == 2));
        assert!((validation.integrity_score_percent - 66.666).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_reopen_resumes_chain() {
        let store = Arc::new(MemoryLedgerStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap()));
        let first_ledger = AuditLedger::open(store.clone(), clock.clone(), Arc::new(SequentialIds::new("a")))
            .await
            .unwrap();
        let first = first_ledger.append(draft("alice", "a", Severity::Low)).await.unwrap();

        let reopened = AuditLedger::open(store.clone(), clock, Arc::new(SequentialIds::new("b")))
            .await
            .unwrap();
        let second = reopened.append(draft("bob", "b", Severity::Low)).await.unwrap();

        assert_eq!(second.sequence, 1);
        assert_eq!(second.previous_hash, first.record_hash);
        assert!(reopened.validate().await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_summary_picks_most_active_and_highest_severity() {
        let (ledger, _store, clock) = ledger_with_store().await;
        for (actor, action, severity) in [
            ("bob", "price.update", Severity::Low),
            ("alice", "seller.suspend", Severity::Critical),
            ("alice", "seller.approve", Severity::Medium),
            ("bob", "fraud.flag", Severity::Critical),
            ("carol", "opas.submit", Severity::High),
        ] {
            clock.advance(Duration::seconds(1));
            ledger.append(draft(actor, action, severity)).await.unwrap();
        }

        let summary = ledger.summarize(None).await.unwrap();
        assert_eq!(summary.total_records, 5);
        assert_eq!(summary.by_actor["alice"], 2);
        assert_eq!(summary.by_severity["critical"], 2);
        assert_eq!(summary.most_active_actor.as_deref(), Some("alice"));
        assert_eq!(summary.highest_severity, Some(Severity::Critical));
        // Newest critical record wins.
        assert_eq!(summary.highest_severity_action.as_deref(), Some("fraud.flag"));
    }

    #[tokio::test]
    async fn test_checkpoint() {
        let (ledger, _store, _clock) = ledger_with_store().await;
        assert!(ledger.checkpoint().await.unwrap().is_none());

        ledger.append(draft("alice", "a", Severity::Low)).await.unwrap();
        let last = ledger.append(draft("alice", "b", Severity::Low)).await.unwrap();

        let checkpoint = ledger.checkpoint().await.unwrap().unwrap();
        assert_eq!(checkpoint.record_count, 2);
        assert_eq!(checkpoint.head_hash, last.record_hash);
        assert!(checkpoint.merkle_root.starts_with("sha256:"));
    }
}
