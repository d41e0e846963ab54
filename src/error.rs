use thiserror::Error;

impl From<serde_json::Error> for OversightError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for OversightError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(format!("Database error: {}", err))
    }
}

impl From<std::io::Error> for OversightError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageUnavailable(format!("I/O error: {}", err))
    }
}

impl From<config::ConfigError> for OversightError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Errors surfaced by the ledger and the approval workflow.
///
/// Integrity violations are deliberately absent: a failed verification is
/// reported as data in `VerificationReport` / `LedgerValidation`.
#[derive(Error, Debug)]
pub enum OversightError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Approver {approver_id} is not designated for request {request_id}")]
    UnauthorizedApprover {
        approver_id: String,
        request_id: String,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, OversightError>;

impl OversightError {
    pub fn not_found(kind: &str, id: &str) -> Self {
        Self::NotFound(format!("{} {} does not exist", kind, id))
    }

    pub fn empty_field(field: &str) -> Self {
        Self::Validation(format!("{} must not be empty", field))
    }

    /// Only storage outages are worth a bounded retry by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Stable machine-readable kind, used by the HTTP surface.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Validation(_) => "validation_error",
            Self::UnauthorizedApprover { .. } => "unauthorized_approver",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::Encoding(_) => "encoding_error",
            Self::Config(_) => "config_error",
        }
    }
}
