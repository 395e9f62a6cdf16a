use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProgressionError>;

#[derive(Debug, Error)]
pub enum ProgressionError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("concurrent update detected for user {user_id}")]
    ConcurrencyConflict { user_id: String },

    #[error("achievement catalog mismatch: {0}")]
    CatalogMismatch(String),

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ProgressionError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidState(reason.into())
    }

    pub fn conflict(user_id: &str) -> Self {
        Self::ConcurrencyConflict {
            user_id: user_id.to_string(),
        }
    }

    /// Only lost optimistic-concurrency races are retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::ConcurrencyConflict { .. } => "conflict",
            Self::CatalogMismatch(_) => "catalog_mismatch",
            Self::Timeout(_) => "timeout",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<validator::ValidationErrors> for ProgressionError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::InvalidState(errors.to_string())
    }
}

impl From<serde_json::Error> for ProgressionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(anyhow::Error::new(e).context("Failed to (de)serialize event result"))
    }
}
