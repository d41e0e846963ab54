//! SQLite Ledger Store
//!
//! Records live in `audit_records`, guarded by triggers that abort any
//! UPDATE or DELETE. Indexed columns duplicate a few fields for filtering;
//! `body` holds the full sealed record.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{instrument, warn};

use crate::audit::query::{LedgerQuery, QueryPage};
use crate::audit::record::AuditRecord;
use crate::audit::store::{LedgerStore, MalformedEntry, StoredEntry};
use crate::error::Result;

pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn decode_row(row: &SqliteRow) -> Result<AuditRecord> {
    let body: String = row.try_get("body")?;
    Ok(serde_json::from_str(&body)?)
}

enum Bind {
    Text(String),
    Int(i64),
}

fn where_clause(query: &LedgerQuery) -> (String, Vec<Bind>) {
    let mut conditions = vec!["1=1".to_string()];
    let mut binds = Vec::new();

    let text_filters = [
        ("actor_id", &query.actor_id),
        ("action", &query.action),
        ("category", &query.category),
        ("entity_type", &query.entity_type),
        ("entity_id", &query.entity_id),
    ];
    for (column, value) in text_filters {
        if let Some(v) = value {
            conditions.push(format!("{} = ?", column));
            binds.push(Bind::Text(v.clone()));
        }
    }
    if let Some(severity) = query.severity {
        conditions.push("severity = ?".to_string());
        binds.push(Bind::Text(severity.as_str().to_string()));
    }
    if let Some(start) = query.start {
        conditions.push("timestamp_us >= ?".to_string());
        binds.push(Bind::Int(start.timestamp_micros()));
    }
    if let Some(end) = query.end {
        conditions.push("timestamp_us <= ?".to_string());
        binds.push(Bind::Int(end.timestamp_micros()));
    }

    (conditions.join(" AND "), binds)
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    #[instrument(skip(self, record), fields(record_id = %record.id, sequence = record.sequence))]
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_records
            (sequence, id, actor_id, action, category, entity_type, entity_id,
             severity, status, timestamp_us, record_hash, body)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.sequence as i64)
        .bind(&record.id)
        .bind(&record.actor_id)
        .bind(&record.action)
        .bind(&record.category)
        .bind(&record.entity_type)
        .bind(&record.entity_id)
        .bind(record.severity.as_str())
        .bind(record.status.as_str())
        .bind(record.timestamp.timestamp_micros())
        .bind(&record.record_hash)
        .bind(serde_json::to_string(record)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Option<AuditRecord>> {
        let row = sqlx::query("SELECT body FROM audit_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn last(&self) -> Result<Option<AuditRecord>> {
        let row = sqlx::query("SELECT body FROM audit_records ORDER BY sequence DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_row).transpose()
    }

    #[instrument(skip(self))]
    async fn query(&self, query: &LedgerQuery) -> Result<QueryPage> {
        let (clause, binds) = where_clause(query);
        let limit = query.effective_limit();
        let offset = query.effective_offset();

        let count_sql = format!("SELECT COUNT(*) AS cnt FROM audit_records WHERE {}", clause);
        let mut count_query = sqlx::query(&count_sql);
        for bind in &binds {
            count_query = match bind {
                Bind::Text(v) => count_query.bind(v.clone()),
                Bind::Int(v) => count_query.bind(*v),
            };
        }
        let total: i64 = count_query.fetch_one(&self.pool).await?.try_get("cnt")?;

        let select_sql = format!(
            "SELECT body FROM audit_records WHERE {} \
             ORDER BY timestamp_us DESC, sequence ASC LIMIT ? OFFSET ?",
            clause
        );
        let mut select_query = sqlx::query(&select_sql);
        for bind in &binds {
            select_query = match bind {
                Bind::Text(v) => select_query.bind(v.clone()),
                Bind::Int(v) => select_query.bind(*v),
            };
        }
        let rows = select_query
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        let records = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;
        let total_count = total.max(0) as usize;
        let has_more = offset + records.len() < total_count;

        Ok(QueryPage {
            records,
            total_count,
            has_more,
        })
    }

    async fn scan(&self) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query("SELECT body FROM audit_records ORDER BY sequence ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_row).collect()
    }

    async fn scan_entries(&self) -> Result<Vec<StoredEntry>> {
        let rows = sqlx::query(
            "SELECT sequence, id, record_hash, body FROM audit_records ORDER BY sequence ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let body: String = row.try_get("body")?;
            match serde_json::from_str::<AuditRecord>(&body) {
                Ok(record) => entries.push(StoredEntry::Record(record)),
                Err(e) => {
                    let sequence: i64 = row.try_get("sequence")?;
                    warn!("Undecodable body in audit_records row #{}: {}", sequence, e);
                    // Indexed columns survive a mangled body.
                    let mut malformed = MalformedEntry::from_raw(i + 1, &body, e);
                    malformed.sequence = Some(sequence.max(0) as u64);
                    malformed.record_id = Some(row.try_get("id")?);
                    malformed.record_hash = Some(row.try_get("record_hash")?);
                    entries.push(StoredEntry::Malformed(malformed));
                }
            }
        }
        Ok(entries)
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS cnt FROM audit_records")
            .fetch_one(&self.pool)
            .await?
            .try_get("cnt")?;
        Ok(count.max(0) as u64)
    }
}
