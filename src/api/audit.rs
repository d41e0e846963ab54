//! Ledger endpoints

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::AppState;
use crate::audit::{
    AuditRecord, LedgerCheckpoint, LedgerQuery, LedgerSummary, LedgerValidation, QueryPage,
    RecordDraft, TimeRange, VerificationReport,
};
use crate::error::Result;

#[derive(Debug, Deserialize)]
pub struct FailureBody {
    #[serde(flatten)]
    pub draft: RecordDraft,
    pub failure_reason: String,
}

pub async fn append_record(
    State(state): State<AppState>,
    Json(draft): Json<RecordDraft>,
) -> Result<(StatusCode, Json<AuditRecord>)> {
    let record = state.ledger.append(draft).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn append_failure(
    State(state): State<AppState>,
    Json(body): Json<FailureBody>,
) -> Result<(StatusCode, Json<AuditRecord>)> {
    let record = state
        .ledger
        .append_failure(body.draft, &body.failure_reason)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn query_records(
    State(state): State<AppState>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<QueryPage>> {
    Ok(Json(state.ledger.query(&query).await?))
}

pub async fn get_record(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AuditRecord>> {
    Ok(Json(state.ledger.get(&id).await?))
}

pub async fn verify_record(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<VerificationReport>> {
    Ok(Json(state.ledger.verify(&id).await?))
}

pub async fn validate_ledger(State(state): State<AppState>) -> Result<Json<LedgerValidation>> {
    Ok(Json(state.ledger.validate().await?))
}

pub async fn summarize_ledger(
    State(state): State<AppState>,
    Query(range): Query<TimeRange>,
) -> Result<Json<LedgerSummary>> {
    Ok(Json(state.ledger.summarize(Some(range)).await?))
}

/// `null` for an empty ledger.
pub async fn checkpoint(State(state): State<AppState>) -> Result<Json<Option<LedgerCheckpoint>>> {
    Ok(Json(state.ledger.checkpoint().await?))
}
