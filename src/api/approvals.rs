//! Approval workflow endpoints

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::AppState;
use crate::audit::TimeRange;
use crate::error::Result;
use crate::workflow::engine::SWEEP_ACTOR;
use crate::workflow::{
    ApprovalRequest, Decision, NewApprovalRequest, PendingFilter, PendingRequest, SweepAction,
    SweepOutcome, WorkflowSummary,
};

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub approver_id: String,
    pub decision: Decision,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActorBody {
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct SweepBody {
    pub action: SweepAction,
    #[serde(default)]
    pub actor: Option<String>,
}

pub async fn create_request(
    State(state): State<AppState>,
    Json(new): Json<NewApprovalRequest>,
) -> Result<(StatusCode, Json<ApprovalRequest>)> {
    let request = state.engine.create_request(new).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn submit_decision(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<ApprovalRequest>> {
    let request = state
        .engine
        .submit_decision(&id, &body.approver_id, body.decision, body.comments)
        .await?;
    Ok(Json(request))
}

pub async fn list_pending(
    State(state): State<AppState>,
    Query(filter): Query<PendingFilter>,
) -> Result<Json<Vec<PendingRequest>>> {
    Ok(Json(state.engine.list_pending(&filter).await?))
}

pub async fn get_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ApprovalRequest>> {
    Ok(Json(state.engine.get_request(&id).await?))
}

pub async fn get_chain(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ApprovalRequest>>> {
    Ok(Json(state.engine.get_chain(&id).await?))
}

pub async fn expire_request(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<ActorBody>,
) -> Result<Json<ApprovalRequest>> {
    Ok(Json(state.engine.expire_request(&id, &body.actor).await?))
}

pub async fn sweep_overdue(
    State(state): State<AppState>,
    Json(body): Json<SweepBody>,
) -> Result<Json<SweepOutcome>> {
    let actor = body.actor.as_deref().unwrap_or(SWEEP_ACTOR);
    Ok(Json(state.engine.sweep_overdue(body.action, actor).await?))
}

pub async fn summarize(
    State(state): State<AppState>,
    Query(range): Query<TimeRange>,
) -> Result<Json<WorkflowSummary>> {
    Ok(Json(state.engine.summarize(Some(range)).await?))
}
