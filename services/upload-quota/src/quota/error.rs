use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("user must be authenticated")]
    Unauthenticated,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("reservation {0} not found")]
    NotFound(String),
    #[error("reservation does not belong to authenticated user")]
    PermissionDenied,
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("daily upload limit ({limit}) reached")]
    ResourceExhausted { limit: u32 },
    #[error("quota store unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    StorageError(#[from] StorageError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl QuotaError {
    pub fn code(&self) -> &'static str {
        match self {
            QuotaError::Unauthenticated => "unauthenticated",
            QuotaError::InvalidArgument(_) => "invalid_argument",
            QuotaError::NotFound(_) => "not_found",
            QuotaError::PermissionDenied => "permission_denied",
            QuotaError::FailedPrecondition(_) => "failed_precondition",
            QuotaError::ResourceExhausted { .. } => "resource_exhausted",
            QuotaError::Unavailable(_) => "unavailable",
            QuotaError::StorageError(_) | QuotaError::Internal(_) => "internal_error",
        }
    }

    /// Store-level failure that left nothing applied.
    pub fn is_transient(&self) -> bool {
        matches!(self, QuotaError::StorageError(err) if err.is_transient())
    }
}
