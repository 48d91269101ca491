use ulid::Ulid;

use crate::model::{BookingStatus, BookingSummary};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed or out-of-range input. Never worth retrying.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The requested interval clashes with existing bookings.
    #[error("space is not available: {} conflicting booking(s)", conflicts.len())]
    Conflict { conflicts: Vec<BookingSummary> },
    #[error("capacity {0} reached")]
    CapacityExceeded(u32),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("not found: {kind} {id}")]
    NotFound { kind: &'static str, id: Ulid },
    #[error("cannot {action} a booking that is {from}")]
    InvalidState {
        from: BookingStatus,
        action: &'static str,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub(crate) fn not_found(kind: &'static str, id: Ulid) -> Self {
        EngineError::NotFound { kind, id }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Short machine-readable code, used by the HTTP layer and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::Conflict { .. } => "conflict",
            EngineError::CapacityExceeded(_) => "capacity_exceeded",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::NotFound { .. } => "not_found",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "internal",
        }
    }
}
