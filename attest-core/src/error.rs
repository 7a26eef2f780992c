//! Error types for Attest operations

use crate::enums::EntityType;
use crate::gid::{Gid, GidError};
use thiserror::Error;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    ConcurrentModification,
    IncompleteCascade,
    NoStateRecorded,
    StoreUnavailable,
    Internal,
}

/// Errors surfaced by every Attest layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: EntityType, id: Gid },

    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("invalid cursor: {reason}")]
    InvalidCursor { reason: String },

    #[error("{entity_type} {id} was modified concurrently (expected version {expected_version})")]
    ConcurrentModification {
        entity_type: EntityType,
        id: Gid,
        expected_version: i32,
    },

    #[error("incomplete cascade deleting {entity_type} {id}: {reason}")]
    IncompleteCascade {
        entity_type: EntityType,
        id: Gid,
        reason: String,
    },

    #[error("no state recorded for {entity_type} {id}")]
    NoStateRecorded { entity_type: EntityType, id: Gid },

    #[error("store unavailable during {operation}: {reason}")]
    StoreUnavailable { operation: String, reason: String },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for Attest operations.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::InvalidArgument { .. } | CoreError::InvalidCursor { .. } => {
                ErrorKind::InvalidArgument
            }
            CoreError::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            CoreError::IncompleteCascade { .. } => ErrorKind::IncompleteCascade,
            CoreError::NoStateRecorded { .. } => ErrorKind::NoStateRecorded,
            CoreError::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn not_found(id: Gid) -> Self {
        CoreError::NotFound {
            entity_type: id.entity_type(),
            id,
        }
    }

    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_cursor(reason: impl Into<String>) -> Self {
        CoreError::InvalidCursor {
            reason: reason.into(),
        }
    }

    pub fn store_unavailable(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::StoreUnavailable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CoreError::Internal(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<GidError> for CoreError {
    fn from(err: GidError) -> Self {
        CoreError::invalid_argument("id", err.to_string())
    }
}
