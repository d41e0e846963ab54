//! Audit Record
//!
//! Immutable, hash-chained record of one privileged action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::canonical::{self, Snapshot};
use crate::error::{OversightError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = OversightError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(OversightError::Validation(format!(
                "Unknown severity: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Success,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Success => "success",
            RecordStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sealed ledger record. Never mutated after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub sequence: u64,
    pub action: String,
    pub category: String,
    pub actor_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub status: RecordStatus,
    pub reason: String,
    pub notes: Option<String>,
    pub before_state: Option<Snapshot>,
    pub after_state: Option<Snapshot>,
    pub before_hash: Option<String>,
    pub after_hash: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub previous_hash: String,
    pub record_hash: String,
}

impl AuditRecord {
    /// Canonical bytes of every field except `record_hash`.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut value = serde_json::to_value(self)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("record_hash");
        }
        canonical::encode(&value)
    }

    /// Recompute the chained hash from the stored fields.
    pub fn calculate_hash(&self) -> Result<String> {
        Ok(canonical::chain_hash(
            &self.canonical_bytes()?,
            &self.previous_hash,
        ))
    }

    /// True when the stored `record_hash` matches the recomputed one.
    pub fn verify_hash(&self) -> bool {
        match self.calculate_hash() {
            Ok(hash) => hash == self.record_hash,
            Err(_) => false,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "#{} {} by {} on {}:{} ({})",
            self.sequence, self.action, self.actor_id, self.entity_type, self.entity_id, self.status
        )
    }
}

/// Caller-supplied content of a record about to be appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordDraft {
    pub actor_id: String,
    pub action: String,
    pub category: String,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default)]
    pub before: Option<Snapshot>,
    #[serde(default)]
    pub after: Option<Snapshot>,
    pub severity: Option<Severity>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RecordDraft {
    pub fn new(actor_id: &str, action: &str, category: &str) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            action: action.to_string(),
            category: category.to_string(),
            ..Default::default()
        }
    }

    pub fn entity(mut self, entity_type: &str, entity_id: &str) -> Self {
        self.entity_type = entity_type.to_string();
        self.entity_id = entity_id.to_string();
        self
    }

    pub fn before(mut self, snapshot: Snapshot) -> Self {
        self.before = Some(snapshot);
        self
    }

    pub fn after(mut self, snapshot: Snapshot) -> Self {
        self.after = Some(snapshot);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn reason(mut self, reason: &str) -> Self {
        self.reason = reason.to_string();
        self
    }

    pub fn notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    pub fn meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("actor_id", &self.actor_id),
            ("action", &self.action),
            ("category", &self.category),
            ("entity_type", &self.entity_type),
            ("entity_id", &self.entity_id),
            ("reason", &self.reason),
        ] {
            if value.trim().is_empty() {
                return Err(OversightError::empty_field(field));
            }
        }
        Ok(())
    }
}
