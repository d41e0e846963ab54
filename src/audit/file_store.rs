//! JSON-lines Ledger Store
//!
//! Append-only file with one sealed record per line. Every append is
//! flushed before it is acknowledged; reads always go back to the file so
//! out-of-band edits are visible to verification.

use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::audit::query::{LedgerQuery, QueryPage};
use crate::audit::record::AuditRecord;
use crate::audit::store::{LedgerStore, MalformedEntry, StoredEntry};
use crate::error::{OversightError, Result};

pub struct JsonlLedgerStore {
    path: PathBuf,
    writer: Mutex<WriterState>,
}

struct WriterState {
    file: File,
    last_sequence: Option<u64>,
}

impl JsonlLedgerStore {
    /// Open (creating if needed) the ledger file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    OversightError::StorageUnavailable(format!(
                        "Failed to create ledger directory: {}",
                        e
                    ))
                })?;
            }
        }

        let existing = read_entries(&path)?;
        let last_sequence = existing.iter().rev().find_map(|entry| match entry {
            StoredEntry::Record(record) => Some(record.sequence),
            StoredEntry::Malformed(malformed) => malformed.sequence,
        });

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                OversightError::StorageUnavailable(format!("Failed to open ledger file: {}", e))
            })?;

        info!(
            "Opened JSONL ledger {:?} with {} existing records",
            path,
            existing.len()
        );

        Ok(Self {
            path,
            writer: Mutex::new(WriterState {
                file,
                last_sequence,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every entry from a JSONL ledger file. Lines that no longer decode
/// come back as `StoredEntry::Malformed`; only I/O failures are errors.
pub fn read_entries(path: &Path) -> Result<Vec<StoredEntry>> {
    if !path.exists() {
        return Ok(vec![]);
    }

    let file = File::open(path).map_err(|e| {
        OversightError::StorageUnavailable(format!("Failed to open ledger file: {}", e))
    })?;

    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| {
            OversightError::StorageUnavailable(format!(
                "Failed to read line {}: {}",
                line_num + 1,
                e
            ))
        })?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<AuditRecord>(&line) {
            Ok(record) => entries.push(StoredEntry::Record(record)),
            Err(e) => {
                warn!("Undecodable ledger entry at line {} of {:?}: {}", line_num + 1, path, e);
                entries.push(StoredEntry::Malformed(MalformedEntry::from_raw(line_num + 1, &line, e)));
            }
        }
    }

    debug!("Loaded {} entries from {:?}", entries.len(), path);
    Ok(entries)
}

/// Decodable records from a JSONL ledger file, in append order.
pub fn load_records(path: &Path) -> Result<Vec<AuditRecord>> {
    Ok(read_entries(path)?
        .into_iter()
        .filter_map(|entry| match entry {
            StoredEntry::Record(record) => Some(record),
            StoredEntry::Malformed(_) => None,
        })
        .collect())
}

#[async_trait]
impl LedgerStore for JsonlLedgerStore {
    #[instrument(skip(self, record), fields(record_id = %record.id, sequence = record.sequence))]
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if let Some(last) = writer.last_sequence {
            if record.sequence <= last {
                return Err(OversightError::InvalidState(format!(
                    "Sequence {} does not follow {}",
                    record.sequence, last
                )));
            }
        }

        let json = serde_json::to_string(record)?;
        writeln!(writer.file, "{}", json).map_err(|e| {
            OversightError::StorageUnavailable(format!("Failed to write to ledger: {}", e))
        })?;
        writer.file.flush().map_err(|e| {
            OversightError::StorageUnavailable(format!("Failed to flush ledger: {}", e))
        })?;

        writer.last_sequence = Some(record.sequence);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<AuditRecord>> {
        Ok(load_records(&self.path)?.into_iter().find(|r| r.id == id))
    }

    /// Fails when the final line is undecodable: nothing can chain onto it.
    async fn last(&self) -> Result<Option<AuditRecord>> {
        match read_entries(&self.path)?.pop() {
            None => Ok(None),
            Some(StoredEntry::Record(record)) => Ok(Some(record)),
            Some(StoredEntry::Malformed(malformed)) => Err(OversightError::Encoding(format!(
                "Last ledger entry (line {}) does not decode: {}",
                malformed.position, malformed.error
            ))),
        }
    }

    async fn query(&self, query: &LedgerQuery) -> Result<QueryPage> {
        let records = load_records(&self.path)?;
        Ok(query.apply(records.iter()))
    }

    async fn scan(&self) -> Result<Vec<AuditRecord>> {
        load_records(&self.path)
    }

    async fn scan_entries(&self) -> Result<Vec<StoredEntry>> {
        read_entries(&self.path)
    }

    async fn count(&self) -> Result<u64> {
        Ok(read_entries(&self.path)?.len() as u64)
    }
}
