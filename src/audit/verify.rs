//! Ledger Verification
//!
//! Per-record hash checks and whole-chain validation. Findings are returned
//! as data; nothing here fails because the ledger was tampered with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::record::AuditRecord;
use crate::audit::store::{MalformedEntry, StoredEntry};
use crate::canonical::GENESIS_HASH;

/// Result of re-hashing one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub record_id: String,
    pub verified: bool,
    pub expected_hash: String,
    pub recomputed_hash: String,
    pub tampering_detected: bool,
}

impl VerificationReport {
    pub fn for_record(record: &AuditRecord) -> Self {
        let recomputed_hash = match record.calculate_hash() {
            Ok(hash) => hash,
            Err(e) => format!("unhashable: {}", e),
        };
        let verified = recomputed_hash == record.record_hash;

        Self {
            record_id: record.id.clone(),
            verified,
            expected_hash: record.record_hash.clone(),
            recomputed_hash,
            tampering_detected: !verified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// Stored hash does not match the record's contents.
    HashMismatch,
    /// `previous_hash` does not point at the preceding record.
    LinkMismatch,
    /// Sequence number does not follow its predecessor.
    SequenceGap,
    NonMonotonicTimestamp,
    /// Stored entry no longer decodes as a record.
    Malformed,
    /// Records the ledger wrote are missing from the end of the store.
    TruncatedTail,
    /// Last stored record is not the head the ledger last wrote.
    HeadMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub sequence: u64,
    /// `None` when the record itself is gone.
    pub record_id: Option<String>,
    pub kind: BreakKind,
    pub description: String,
}

/// Outcome of validating every record and every link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerValidation {
    pub valid: bool,
    pub total_records: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    /// Records the ledger wrote that the store no longer holds.
    #[serde(default)]
    pub missing_records: u64,
    pub broken_record_ids: Vec<String>,
    pub integrity_score_percent: f64,
    pub head_hash: Option<String>,
    #[serde(default)]
    pub head_sequence: Option<u64>,
    pub breaks: Vec<ChainBreak>,
}

impl LedgerValidation {
    pub fn summary(&self) -> String {
        if self.valid {
            format!("✅ Ledger is valid ({} records)", self.total_records)
        } else if self.missing_records > 0 {
            format!(
                "❌ Ledger is invalid: {} of {} records broken, {} missing ({:.2}% integrity)",
                self.invalid_count,
                self.total_records,
                self.missing_records,
                self.integrity_score_percent
            )
        } else {
            format!(
                "❌ Ledger is invalid: {} of {} records broken ({:.2}% integrity)",
                self.invalid_count, self.total_records, self.integrity_score_percent
            )
        }
    }

    /// Compare the stored tail with the head the writer last sealed.
    /// `expected` is `(sequence, record_hash)` of that head, `None` if the
    /// writer never appended.
    pub fn check_head(&mut self, expected: Option<(u64, &str)>) {
        let found = self.head_sequence;
        let finding = match (expected, found) {
            (None, None) => None,
            (None, Some(seq)) => Some((
                seq,
                BreakKind::HeadMismatch,
                format!("store holds record #{} the ledger never wrote", seq),
            )),
            (Some((seq, _)), found) if found.map_or(true, |f| f < seq) => {
                let first_missing = found.map_or(0, |f| f + 1);
                self.missing_records = seq - first_missing + 1;
                Some((
                    first_missing,
                    BreakKind::TruncatedTail,
                    format!("records #{}..=#{} are missing from the store", first_missing, seq),
                ))
            }
            (Some((seq, hash)), Some(found_seq)) => {
                let stored = self.head_hash.as_deref().unwrap_or("");
                if found_seq == seq && stored == hash {
                    None
                } else {
                    Some((
                        found_seq,
                        BreakKind::HeadMismatch,
                        format!("expected head #{} {}, found #{} {}", seq, hash, found_seq, stored),
                    ))
                }
            }
            // Covered by the truncation arm.
            (Some(_), None) => None,
        };

        if let Some((sequence, kind, description)) = finding {
            warn!("Ledger head check failed: {:?} {}", kind, description);
            self.breaks.push(ChainBreak {
                sequence,
                record_id: None,
                kind,
                description,
            });
            self.valid = false;
            self.integrity_score_percent =
                score(self.valid_count, self.total_records + self.missing_records as usize);
        }
    }
}

fn score(valid: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        valid as f64 * 100.0 / total as f64
    }
}

/// What the next entry must link back to.
struct Link {
    sequence: Option<u64>,
    hash: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct ChainWalker {
    previous: Option<Link>,
    total: usize,
    breaks: Vec<ChainBreak>,
    broken_record_ids: Vec<String>,
}

impl ChainWalker {
    fn record(&mut self, record: &AuditRecord) {
        let mut found = Vec::new();

        if !record.verify_hash() {
            found.push((BreakKind::HashMismatch, "record hash does not match contents".to_string()));
        }

        let (expected_prev, expected_seq, prev_ts) = match &self.previous {
            None => (Some(GENESIS_HASH), Some(0), None),
            Some(link) => (link.hash.as_deref(), link.sequence.map(|s| s + 1), link.timestamp),
        };

        if let Some(expected_prev) = expected_prev {
            if record.previous_hash != expected_prev {
                found.push((
                    BreakKind::LinkMismatch,
                    format!("expected previous hash {}, found {}", expected_prev, record.previous_hash),
                ));
            }
        }

        if let Some(expected_seq) = expected_seq {
            if record.sequence != expected_seq {
                found.push((
                    BreakKind::SequenceGap,
                    format!("expected sequence {}, found {}", expected_seq, record.sequence),
                ));
            }
        }

        if let Some(prev_ts) = prev_ts {
            if record.timestamp < prev_ts {
                found.push((
                    BreakKind::NonMonotonicTimestamp,
                    format!("{} precedes {}", record.timestamp, prev_ts),
                ));
            }
        }

        self.push(record.sequence, &record.id, found);
        self.previous = Some(Link {
            sequence: Some(record.sequence),
            hash: Some(record.record_hash.clone()),
            timestamp: Some(record.timestamp),
        });
    }

    fn malformed(&mut self, entry: &MalformedEntry) {
        let sequence = entry.sequence.unwrap_or(entry.position as u64);
        let id = entry
            .record_id
            .clone()
            .unwrap_or_else(|| format!("entry-{}", entry.position));
        let description = format!("entry {} does not decode: {}", entry.position, entry.error);

        self.push(sequence, &id, vec![(BreakKind::Malformed, description)]);
        // Whatever survived still anchors the next link check.
        self.previous = Some(Link {
            sequence: entry.sequence,
            hash: entry.record_hash.clone(),
            timestamp: None,
        });
    }

    fn push(&mut self, sequence: u64, record_id: &str, found: Vec<(BreakKind, String)>) {
        self.total += 1;
        if found.is_empty() {
            return;
        }
        self.broken_record_ids.push(record_id.to_string());
        for (kind, description) in found {
            warn!("Ledger break at #{} ({}): {:?} {}", sequence, record_id, kind, description);
            self.breaks.push(ChainBreak {
                sequence,
                record_id: Some(record_id.to_string()),
                kind,
                description,
            });
        }
    }

    fn finish(self) -> LedgerValidation {
        let total_records = self.total;
        let invalid_count = self.broken_record_ids.len();
        let valid_count = total_records - invalid_count;
        let (head_sequence, head_hash) = match self.previous {
            Some(link) => (link.sequence, link.hash),
            None => (None, None),
        };

        let validation = LedgerValidation {
            valid: invalid_count == 0,
            total_records,
            valid_count,
            invalid_count,
            missing_records: 0,
            broken_record_ids: self.broken_record_ids,
            integrity_score_percent: score(valid_count, total_records),
            head_hash,
            head_sequence,
            breaks: self.breaks,
        };

        info!("{}", validation.summary());
        validation
    }
}

/// Validate records given in append order.
pub fn validate_chain(records: &[AuditRecord]) -> LedgerValidation {
    let mut walker = ChainWalker::default();
    for record in records {
        walker.record(record);
    }
    walker.finish()
}

/// Validate stored entries in append order, counting undecodable ones as
/// broken records rather than failing.
pub fn validate_entries(entries: &[StoredEntry]) -> LedgerValidation {
    let mut walker = ChainWalker::default();
    for entry in entries {
        match entry {
            StoredEntry::Record(record) => walker.record(record),
            StoredEntry::Malformed(malformed) => walker.malformed(malformed),
        }
    }
    walker.finish()
}
