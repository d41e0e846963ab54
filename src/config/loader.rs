//! Approval policy file loader
//! Loads per-tier quorum and SLA overrides from a YAML file

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{OversightError, Result};
use crate::workflow::policy::{ApprovalPolicy, TierOverride};

/// ```yaml
/// tiers:
///   high:
///     required_approvals: 3
///     sla_hours: 4
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub tiers: BTreeMap<String, TierOverride>,
}

impl PolicyFile {
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading approval policy from: {:?}", path);

        if !path.exists() {
            return Err(OversightError::Config(format!(
                "Policy file not found: {:?}",
                path
            )));
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            OversightError::Config(format!("Failed to read {:?}: {}", path, e))
        })?;

        Self::parse(&contents)
            .map_err(|e| OversightError::Config(format!("Failed to parse {:?}: {}", path, e)))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| OversightError::Config(e.to_string()))
    }

    /// Overlay this file onto `base` and validate the result.
    pub fn apply_to(&self, base: ApprovalPolicy) -> Result<ApprovalPolicy> {
        let policy = base.apply_overrides(&self.tiers)?;
        info!("Approval policy file applied ({} tier overrides)", self.tiers.len());
        Ok(policy)
    }
}
