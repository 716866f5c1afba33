//! PostgreSQL storage backend for Waypoint self-service.
//!
//! Provides persistent storage for login flows, scoped per tenant, plus the
//! embedded schema migrations for its tables.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use waypoint_auth::ContextualTenant;
//! use waypoint_auth_postgres::{PostgresLoginFlowStorage, connect, migrations};
//!
//! let pool = connect("postgres://localhost/waypoint").await?;
//! migrations::run(&pool).await?;
//!
//! let flows = PostgresLoginFlowStorage::new(pool, Arc::new(ContextualTenant::strict()));
//! ```

pub mod login_flow;
pub mod migrations;

use sqlx_core::pool::{Pool, PoolOptions};
use sqlx_postgres::Postgres;
use waypoint_auth::AuthError;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use login_flow::PostgresLoginFlowStorage;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Requested row was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Row already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored row could not be turned back into a domain value.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Schema migration failed.
    #[error("Migration failed: {0}")]
    Migration(String),
}

impl StorageError {
    /// Create a `NotFound` error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Returns `true` if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if the database rejected a duplicate key.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx_core::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        if err.is_unique_violation() {
            return AuthError::conflict(err.to_string());
        }
        match err {
            StorageError::NotFound(resource) => AuthError::not_found(resource),
            StorageError::Conflict(message) => AuthError::conflict(message),
            StorageError::Corrupt(message) => AuthError::invariant(message),
            StorageError::Migration(message) => AuthError::store_unavailable(message),
            StorageError::Database(e) => match e {
                sqlx_core::Error::ColumnDecode { .. }
                | sqlx_core::Error::Decode(_)
                | sqlx_core::Error::TypeNotFound { .. }
                | sqlx_core::Error::ColumnNotFound(_) => AuthError::invariant(e.to_string()),
                sqlx_core::Error::RowNotFound => AuthError::not_found("row"),
                _ => AuthError::store_unavailable(e.to_string()),
            },
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Connects a pool to `database_url`.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn connect(database_url: &str) -> StorageResult<PgPool> {
    let pool = PoolOptions::<Postgres>::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err: AuthError = StorageError::not_found("login flow 1").into();
        assert!(err.is_not_found());

        let err: AuthError = StorageError::conflict("dup").into();
        assert!(matches!(err, AuthError::Conflict { .. }));

        let err: AuthError = StorageError::Corrupt("state 'x'".into()).into();
        assert!(matches!(err, AuthError::InvariantViolation { .. }));

        let err: AuthError = StorageError::Database(sqlx_core::Error::PoolTimedOut).into();
        assert!(matches!(err, AuthError::StoreUnavailable { .. }));
        assert!(err.is_retryable());

        let err: AuthError = StorageError::Database(sqlx_core::Error::PoolClosed).into();
        assert!(matches!(err, AuthError::StoreUnavailable { .. }));
    }
}
