//! Approval Policy
//!
//! Risk tier → quorum and SLA table, fixed onto each request at creation.
//!
//! | Risk     | Approvals | SLA  |
//! |----------|-----------|------|
//! | Low      | 1         | 24h  |
//! | Medium   | 2         | 12h  |
//! | High     | 3         | 6h   |
//! | Critical | 4         | 2h   |

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{OversightError, Result};
use crate::workflow::types::RiskLevel;

/// Longest SLA any tier may carry: one year.
pub const MAX_SLA_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub required_approvals: usize,
    pub sla_hours: i64,
}

impl TierPolicy {
    pub fn sla(&self) -> Duration {
        Duration::hours(self.sla_hours)
    }

    /// Built-in defaults for a tier.
    pub fn default_for(risk: RiskLevel) -> Self {
        match risk {
            RiskLevel::Low => TierPolicy { required_approvals: 1, sla_hours: 24 },
            RiskLevel::Medium => TierPolicy { required_approvals: 2, sla_hours: 12 },
            RiskLevel::High => TierPolicy { required_approvals: 3, sla_hours: 6 },
            RiskLevel::Critical => TierPolicy { required_approvals: 4, sla_hours: 2 },
        }
    }
}

/// Partial override of one tier; omitted fields keep the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierOverride {
    pub required_approvals: Option<usize>,
    pub sla_hours: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalPolicy {
    tiers: BTreeMap<RiskLevel, TierPolicy>,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            tiers: RiskLevel::ALL
                .iter()
                .map(|&risk| (risk, TierPolicy::default_for(risk)))
                .collect(),
        }
    }
}

impl ApprovalPolicy {
    /// Build a policy from a complete table.
    pub fn from_tiers(tiers: BTreeMap<RiskLevel, TierPolicy>) -> Result<Self> {
        let policy = Self { tiers };
        policy.validate()?;
        Ok(policy)
    }

    pub fn tier(&self, risk: RiskLevel) -> TierPolicy {
        self.tiers
            .get(&risk)
            .copied()
            .unwrap_or_else(|| TierPolicy::default_for(risk))
    }

    pub fn tiers(&self) -> impl Iterator<Item = (&RiskLevel, &TierPolicy)> {
        self.tiers.iter()
    }

    /// Overlay overrides keyed by tier name (`low`, `medium`, ...).
    pub fn apply_overrides(mut self, overrides: &BTreeMap<String, TierOverride>) -> Result<Self> {
        for (name, tier_override) in overrides {
            let risk: RiskLevel = name.parse()?;
            let mut tier = self.tier(risk);
            if let Some(required) = tier_override.required_approvals {
                tier.required_approvals = required;
            }
            if let Some(hours) = tier_override.sla_hours {
                tier.sla_hours = hours;
            }
            self.tiers.insert(risk, tier);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        for risk in RiskLevel::ALL {
            let tier = self.tiers.get(&risk).ok_or_else(|| {
                OversightError::Config(format!("Approval policy is missing tier {}", risk))
            })?;

            if tier.required_approvals == 0 {
                return Err(OversightError::Config(format!(
                    "Tier {}: required_approvals must be at least 1",
                    risk
                )));
            }

            if !(1..=MAX_SLA_HOURS).contains(&tier.sla_hours) {
                return Err(OversightError::Config(format!(
                    "Tier {}: sla_hours ({}) must be between 1 and {}",
                    risk, tier.sla_hours, MAX_SLA_HOURS
                )));
            }
        }
        Ok(())
    }

    pub fn format_threshold_status(&self, risk: RiskLevel, current: usize) -> String {
        let tier = self.tier(risk);
        let marker = if current >= tier.required_approvals { "✅" } else { "⏳" };
        format!(
            "{} Approvals: {}/{} ({} risk, {}h SLA)",
            marker, current, tier.required_approvals, risk, tier.sla_hours
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let policy = ApprovalPolicy::default();
        assert_eq!(policy.tier(RiskLevel::Low), TierPolicy { required_approvals: 1, sla_hours: 24 });
        assert_eq!(policy.tier(RiskLevel::Medium).required_approvals, 2);
        assert_eq!(policy.tier(RiskLevel::High).sla(), Duration::hours(6));
        assert_eq!(policy.tier(RiskLevel::Critical), TierPolicy { required_approvals: 4, sla_hours: 2 });
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_overrides_merge_per_field() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "high".to_string(),
            TierOverride { required_approvals: Some(5), sla_hours: None },
        );

        let policy = ApprovalPolicy::default().apply_overrides(&overrides).unwrap();
        assert_eq!(policy.tier(RiskLevel::High), TierPolicy { required_approvals: 5, sla_hours: 6 });
        assert_eq!(policy.tier(RiskLevel::Low), TierPolicy::default_for(RiskLevel::Low));
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let mut zero = BTreeMap::new();
        zero.insert("low".to_string(), TierOverride { required_approvals: Some(0), sla_hours: None });
        assert!(matches!(
            ApprovalPolicy::default().apply_overrides(&zero),
            Err(OversightError::Config(_))
        ));

        let mut unknown = BTreeMap::new();
        unknown.insert("extreme".to_string(), TierOverride::default());
        assert!(matches!(
            ApprovalPolicy::default().apply_overrides(&unknown),
            Err(OversightError::Validation(_))
        ));
    }

    #[test]
    fn test_sla_hours_bounded() {
        let mut huge = BTreeMap::new();
        huge.insert("high".to_string(), TierOverride { required_approvals: None, sla_hours: Some(i64::MAX) });
        assert!(matches!(
            ApprovalPolicy::default().apply_overrides(&huge),
            Err(OversightError::Config(_))
        ));

        let mut year = BTreeMap::new();
        year.insert("high".to_string(), TierOverride { required_approvals: None, sla_hours: Some(MAX_SLA_HOURS) });
        let policy = ApprovalPolicy::default().apply_overrides(&year).unwrap();
        assert_eq!(policy.tier(RiskLevel::High).sla(), Duration::days(365));
    }

    #[test]
    fn test_incomplete_table_rejected() {
        let mut tiers = BTreeMap::new();
        tiers.insert(RiskLevel::Low, TierPolicy::default_for(RiskLevel::Low));
        assert!(ApprovalPolicy::from_tiers(tiers).is_err());
    }

    #[test]
    fn test_threshold_status() {
        let policy = ApprovalPolicy::default();
        assert!(policy.format_threshold_status(RiskLevel::Medium, 1).contains("1/2"));
        assert!(policy.format_threshold_status(RiskLevel::Medium, 2).starts_with("✅"));
    }
}
