//! Merkle Checkpoints
//!
//! Builds a Merkle root over record hashes so a ledger state can be
//! anchored externally and later re-checked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Snapshot of the ledger head suitable for external anchoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerCheckpoint {
    pub record_count: usize,
    pub head_hash: String,
    pub merkle_root: String,
    pub taken_at: DateTime<Utc>,
}

fn combine(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Root over `leaves` in order; an odd node is paired with itself.
/// Returns `None` for an empty ledger.
pub fn merkle_root(leaves: &[String]) -> Option<String> {
    if leaves.is_empty() {
        return None;
    }

    let mut level: Vec<String> = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => combine(left, right),
                [single] => combine(single, single),
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }

    let root = level.pop();
    debug!("Merkle root over {} leaves: {:?}", leaves.len(), root);
    root
}

pub fn verify_merkle_root(leaves: &[String], claimed_root: &str) -> bool {
    merkle_root(leaves).as_deref() == Some(claimed_root)
}
