//! SQLite persistence layer for the PR review backend.
//!
//! Provides database initialization, connection pooling, and per-entity
//! repositories for everything the workflow engine checkpoints:
//! trigger events, workflows, agent runs, artifacts, reviewer decisions,
//! preference models, and analytics events.
//!
//! Design:
//! - One repository module per logical table; functions take `&DbPool`.
//! - Records are typed structs; statuses are enums encoded as TEXT.
//! - Timestamps are UTC epoch milliseconds (`INTEGER`).
//! - All fallible operations return [`StorageError`].

pub mod agent_runs;
pub mod analytics;
pub mod artifacts;
pub mod decisions;
pub mod errors;
pub mod preferences;
pub mod records;
pub mod trigger_events;
pub mod workflows;

pub use errors::StorageError;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;

/// Type alias for the SQLite connection pool.
pub type DbPool = sqlx::SqlitePool;

/// Current UTC time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Liveness probe for the health endpoint.
pub async fn ping(pool: &DbPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

/// Initialize the database from a `DB_URL`-style path.
///
/// Creates the file and parent directories if missing, enables WAL mode for
/// concurrent reads during checkpoint writes, runs embedded migrations, and
/// returns a pool.
pub async fn init_db(db_path: &str) -> Result<DbPool, StorageError> {
    let path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);

    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                source: sqlx::Error::Configuration(
                    format!("failed to create directory {}: {e}", parent.display()).into(),
                ),
            })?;
        }
    }

    let connect_options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))
        .map_err(|e| StorageError::Connection { source: e })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(1)
        .idle_timeout(Duration::from_secs(300))
        .connect_with(connect_options)
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StorageError::Migration { source: e })?;

    Ok(pool)
}

/// Initialize an in-memory database for tests.
pub async fn init_test_db() -> Result<DbPool, StorageError> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| StorageError::Connection { source: e })?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .map_err(|e| StorageError::Connection { source: e })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StorageError::Migration { source: e })?;

    Ok(pool)
}
