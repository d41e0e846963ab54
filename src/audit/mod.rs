//! Audit Ledger
//!
//! Tamper-evident, append-only record of every privileged action, with a
//! genuine hash chain and Merkle checkpoints.

pub mod file_store;
pub mod ledger;
pub mod merkle;
pub mod query;
pub mod record;
pub mod sqlite_store;
pub mod store;
pub mod verify;

pub use file_store::JsonlLedgerStore;
pub use ledger::{AuditLedger, LedgerSummary};
pub use merkle::{merkle_root, verify_merkle_root, LedgerCheckpoint};
pub use query::{LedgerQuery, QueryPage, TimeRange};
pub use record::{AuditRecord, RecordDraft, RecordStatus, Severity};
pub use sqlite_store::SqliteLedgerStore;
pub use store::{LedgerStore, MalformedEntry, MemoryLedgerStore, StoredEntry};
pub use verify::{
    validate_chain, validate_entries, BreakKind, ChainBreak, LedgerValidation, VerificationReport,
};
