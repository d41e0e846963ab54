//! Reporting endpoints

use axum::extract::{Path, Query, State};
use axum::Json;

use super::AppState;
use crate::audit::{QueryPage, TimeRange};
use crate::error::Result;
use crate::reporting::ComplianceReport;

pub async fn compliance_report(
    State(state): State<AppState>,
    Query(range): Query<TimeRange>,
) -> Result<Json<ComplianceReport>> {
    Ok(Json(state.reporter.report(Some(range)).await?))
}

pub async fn actor_activity(
    Path(actor_id): Path<String>,
    State(state): State<AppState>,
    Query(range): Query<TimeRange>,
) -> Result<Json<QueryPage>> {
    Ok(Json(state.reporter.actor_activity(&actor_id, Some(range)).await?))
}
