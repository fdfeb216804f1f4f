use thiserror::Error;
use ulid::Ulid;

use crate::store::StorageError;

/// Why a candidate reservation was not admitted. Expected outcomes, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("invalid range: start must be before end")]
    InvalidRange,
    #[error("overlaps reservation {0}")]
    Overlap(Ulid),
}

impl Rejection {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::InvalidRange => "invalid_range",
            Rejection::Overlap(_) => "overlap",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("booking rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("invalid calendar month: {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Only storage failures are worth retrying; everything else needs different input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            EngineError::Rejected(r) => Some(*r),
            _ => None,
        }
    }
}
