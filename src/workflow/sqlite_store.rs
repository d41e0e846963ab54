//! SQLite Approval Store

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::error::{OversightError, Result};
use crate::workflow::store::ApprovalStore;
use crate::workflow::types::{ApprovalRequest, ApprovalStatus};

pub struct SqliteApprovalStore {
    pool: SqlitePool,
}

impl SqliteApprovalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn decode_row(row: &SqliteRow) -> Result<ApprovalRequest> {
    let body: String = row.try_get("body")?;
    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl ApprovalStore for SqliteApprovalStore {
    #[instrument(skip(self, request), fields(request_id = %request.id))]
    async fn insert(&self, request: &ApprovalRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_requests
            (id, workflow_type, risk_level, status, requested_by, parent_request_id,
             created_at_us, sla_deadline_us, body)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&request.id)
        .bind(&request.workflow_type)
        .bind(request.risk_level.as_str())
        .bind(request.status.as_str())
        .bind(&request.requested_by)
        .bind(request.parent_request_id.as_deref())
        .bind(request.created_at.timestamp_micros())
        .bind(request.sla_deadline.timestamp_micros())
        .bind(serde_json::to_string(request)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, request), fields(request_id = %request.id, status = %request.status))]
    async fn update(&self, request: &ApprovalRequest) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE approval_requests
            SET status = ?, body = ?
            WHERE id = ?
            "#,
        )
        .bind(request.status.as_str())
        .bind(serde_json::to_string(request)?)
        .bind(&request.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OversightError::not_found("approval request", &request.id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Option<ApprovalRequest>> {
        let row = sqlx::query("SELECT body FROM approval_requests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn list(&self, status: Option<ApprovalStatus>) -> Result<Vec<ApprovalRequest>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT body FROM approval_requests WHERE status = ? ORDER BY created_at_us ASC, id ASC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT body FROM approval_requests ORDER BY created_at_us ASC, id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(decode_row).collect()
    }
}
