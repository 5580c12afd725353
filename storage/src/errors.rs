//! Storage error types.

use thiserror::Error;

/// Errors produced by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to open or configure the database.
    #[error("database connection error: {source}")]
    Connection {
        #[source]
        source: sqlx::Error,
    },

    /// Embedded migration failed.
    #[error("database migration error: {source}")]
    Migration {
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// Query execution failed.
    #[error("database query error: {source}")]
    Query {
        #[source]
        source: sqlx::Error,
    },

    /// A persisted value could not be decoded into its typed record.
    #[error("corrupt row in {table}: {detail}")]
    Corrupt {
        table: &'static str,
        detail: String,
    },

    /// Row was expected but not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

impl From<sqlx::Error> for StorageError {
    fn from(source: sqlx::Error) -> Self {
        StorageError::Query { source }
    }
}
