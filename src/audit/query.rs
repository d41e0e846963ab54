//! Ledger query filters and pagination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::record::{AuditRecord, Severity};

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 1000;

/// Inclusive time window; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

/// Conjunction of optional predicates; omitted filters match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerQuery {
    pub actor_id: Option<String>,
    pub action: Option<String>,
    pub category: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub severity: Option<Severity>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl LedgerQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actor(mut self, actor_id: &str) -> Self {
        self.actor_id = Some(actor_id.to_string());
        self
    }

    pub fn action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    pub fn entity(mut self, entity_type: &str, entity_id: &str) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn within(mut self, range: TimeRange) -> Self {
        self.start = range.start;
        self.end = range.end;
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        fn eq(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().map_or(true, |f| f == value)
        }

        eq(&self.actor_id, &record.actor_id)
            && eq(&self.action, &record.action)
            && eq(&self.category, &record.category)
            && eq(&self.entity_type, &record.entity_type)
            && eq(&self.entity_id, &record.entity_id)
            && self.severity.map_or(true, |s| s == record.severity)
            && self.time_range().contains(record.timestamp)
    }

    /// Filter, sort newest-first and paginate records given in insertion order.
    pub fn apply<'a, I>(&self, records: I) -> QueryPage
    where
        I: IntoIterator<Item = &'a AuditRecord>,
    {
        let mut matched: Vec<&AuditRecord> =
            records.into_iter().filter(|r| self.matches(r)).collect();
        // Stable sort: equal timestamps keep insertion order.
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total_count = matched.len();
        let offset = self.effective_offset();
        let limit = self.effective_limit();
        let records: Vec<AuditRecord> = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        let has_more = offset + records.len() < total_count;

        QueryPage {
            records,
            total_count,
            has_more,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPage {
    pub records: Vec<AuditRecord>,
    pub total_count: usize,
    pub has_more: bool,
}
