//! Mapping of PostgreSQL and pool failures onto [`CoreError`].
//!
//! Constraint violations are the caller's fault and become
//! `InvalidArgument`; everything else is reported as `StoreUnavailable`
//! with the operation that was running.

use attest_core::{CoreError, CoreResult};
use deadpool_postgres::{CreatePoolError, PoolError};
use tokio_postgres::error::SqlState;

/// Classify a database error raised during `operation`.
pub fn map_db_error(operation: &'static str, err: &tokio_postgres::Error) -> CoreError {
    if let Some(db) = err.as_db_error() {
        let field = db
            .column()
            .or(db.constraint())
            .unwrap_or("reference")
            .to_string();
        if db.code() == &SqlState::FOREIGN_KEY_VIOLATION {
            tracing::debug!(operation, constraint = ?db.constraint(), "foreign key violation");
            return CoreError::invalid_argument(field, db.message());
        }
        if db.code() == &SqlState::UNIQUE_VIOLATION {
            tracing::debug!(operation, constraint = ?db.constraint(), "unique violation");
            return CoreError::invalid_argument(field, "already exists");
        }
    }

    tracing::error!(operation, error = ?err, "Database error");
    CoreError::store_unavailable(operation, err.to_string())
}

pub fn map_pool_error(operation: &'static str, err: &PoolError) -> CoreError {
    tracing::error!(operation, error = ?err, "Connection pool error");

    match err {
        PoolError::Timeout(_) => {
            CoreError::store_unavailable(operation, "database connection pool exhausted")
        }
        PoolError::Closed => {
            CoreError::store_unavailable(operation, "database connection pool is closed")
        }
        _ => CoreError::store_unavailable(operation, "failed to acquire database connection"),
    }
}

/// Attach the running operation to a database failure.
pub trait DbResultExt<T> {
    fn db_context(self, operation: &'static str) -> CoreResult<T>;
}

impl<T> DbResultExt<T> for Result<T, tokio_postgres::Error> {
    fn db_context(self, operation: &'static str) -> CoreResult<T> {
        self.map_err(|e| map_db_error(operation, &e))
    }
}

impl<T> DbResultExt<T> for Result<T, PoolError> {
    fn db_context(self, operation: &'static str) -> CoreResult<T> {
        self.map_err(|e| map_pool_error(operation, &e))
    }
}

impl<T> DbResultExt<T> for Result<T, CreatePoolError> {
    fn db_context(self, operation: &'static str) -> CoreResult<T> {
        self.map_err(|e| {
            tracing::error!(operation, error = %e, "Failed to create pool");
            CoreError::store_unavailable(operation, e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::ErrorKind;

    #[test]
    fn test_pool_errors_are_store_unavailable() {
        for err in [PoolError::Closed, PoolError::NoRuntimeSpecified] {
            let mapped = map_pool_error("get", &err);
            assert_eq!(mapped.kind(), ErrorKind::StoreUnavailable);
        }
        let mapped = map_pool_error("get", &PoolError::Closed);
        assert!(mapped.to_string().contains("closed"));
    }
}
