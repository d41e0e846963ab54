//! HTTP RPC surface
//!
//! JSON over HTTP for every ledger, workflow and reporting operation.

pub mod approvals;
pub mod audit;
pub mod reports;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::audit::{AuditLedger, JsonlLedgerStore, LedgerStore, MemoryLedgerStore, SqliteLedgerStore};
use crate::clock::{SystemClock, UuidGenerator};
use crate::config::{AppConfig, StorageConfig};
use crate::database::Database;
use crate::error::{OversightError, Result};
use crate::reporting::ComplianceReporter;
use crate::workflow::{ApprovalEngine, ApprovalStore, MemoryApprovalStore, SqliteApprovalStore};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<AuditLedger>,
    pub engine: Arc<ApprovalEngine>,
    pub reporter: ComplianceReporter,
}

impl AppState {
    pub fn new(ledger: Arc<AuditLedger>, engine: Arc<ApprovalEngine>) -> Self {
        let reporter = ComplianceReporter::new(ledger.clone(), engine.clone());
        Self {
            ledger,
            engine,
            reporter,
        }
    }

    /// Wire stores, ledger and engine for the configured backend.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let (ledger_store, approval_store): (Arc<dyn LedgerStore>, Arc<dyn ApprovalStore>) =
            match &config.storage {
                StorageConfig::Memory => (
                    Arc::new(MemoryLedgerStore::new()),
                    Arc::new(MemoryApprovalStore::new()),
                ),
                StorageConfig::Sqlite { database_url } => {
                    let database = Database::connect(database_url).await?;
                    database.run_migrations().await?;
                    (
                        Arc::new(SqliteLedgerStore::new(database.pool().clone())),
                        Arc::new(SqliteApprovalStore::new(database.pool().clone())),
                    )
                }
                StorageConfig::Jsonl { ledger_path } => (
                    Arc::new(JsonlLedgerStore::open(ledger_path)?),
                    Arc::new(MemoryApprovalStore::new()),
                ),
            };

        let ledger = Arc::new(
            AuditLedger::open(ledger_store, Arc::new(SystemClock), Arc::new(UuidGenerator)).await?,
        );
        let engine = Arc::new(ApprovalEngine::new(
            approval_store,
            ledger.clone(),
            config.resolve_policy()?,
        ));

        info!("Oversight state ready ({:?})", config.storage);
        Ok(Self::new(ledger, engine))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/audit/records",
            post(audit::append_record).get(audit::query_records),
        )
        .route("/audit/failures", post(audit::append_failure))
        .route("/audit/records/:id", get(audit::get_record))
        .route("/audit/records/:id/verify", get(audit::verify_record))
        .route("/audit/validate", get(audit::validate_ledger))
        .route("/audit/summary", get(audit::summarize_ledger))
        .route("/audit/checkpoint", get(audit::checkpoint))
        .route("/approvals", post(approvals::create_request))
        .route("/approvals/pending", get(approvals::list_pending))
        .route("/approvals/summary", get(approvals::summarize))
        .route("/approvals/sweep", post(approvals::sweep_overdue))
        .route("/approvals/:id", get(approvals::get_request))
        .route("/approvals/:id/chain", get(approvals::get_chain))
        .route("/approvals/:id/decisions", post(approvals::submit_decision))
        .route("/approvals/:id/expire", post(approvals::expire_request))
        .route("/reports/compliance", get(reports::compliance_report))
        .route("/reports/actors/:actor_id", get(reports::actor_activity))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "oversight",
        "timestamp": chrono::Utc::now()
    }))
}

impl OversightError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            OversightError::NotFound(_) => StatusCode::NOT_FOUND,
            OversightError::Validation(_) => StatusCode::BAD_REQUEST,
            OversightError::InvalidState(_) => StatusCode::CONFLICT,
            OversightError::UnauthorizedApprover { .. } => StatusCode::FORBIDDEN,
            OversightError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            OversightError::Encoding(_) | OversightError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for OversightError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = Json(serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
