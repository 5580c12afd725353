//! Append-only analytics events.
//!
//! Used for predictive-health model weights and other out-of-band training
//! artifacts; readers pick the latest row per kind.

use crate::errors::StorageError;
use crate::{now_ms, DbPool};

/// Append an analytics event.
pub async fn append(
    pool: &DbPool,
    kind: &str,
    repository_id: Option<&str>,
    payload: &serde_json::Value,
) -> Result<(), StorageError> {
    let payload = serde_json::to_string(payload).map_err(|e| StorageError::Corrupt {
        table: "analytics_events",
        detail: format!("unserializable payload: {e}"),
    })?;

    sqlx::query(
        "INSERT INTO analytics_events (kind, repository_id, payload, created_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(kind)
    .bind(repository_id)
    .bind(payload)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(())
}

/// Latest event of a kind, optionally scoped to one repository.
pub async fn latest(
    pool: &DbPool,
    kind: &str,
    repository_id: Option<&str>,
) -> Result<Option<serde_json::Value>, StorageError> {
    let row: Option<(String,)> = match repository_id {
        Some(repo) => {
            sqlx::query_as(
                "SELECT payload FROM analytics_events \
                 WHERE kind = ? AND repository_id = ? \
                 ORDER BY created_at DESC, id DESC LIMIT 1",
            )
            .bind(kind)
            .bind(repo)
            .fetch_optional(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT payload FROM analytics_events \
                 WHERE kind = ? ORDER BY created_at DESC, id DESC LIMIT 1",
            )
            .bind(kind)
            .fetch_optional(pool)
            .await?
        }
    };

    match row {
        None => Ok(None),
        Some((payload,)) => {
            let payload = serde_json::from_str(&payload).map_err(|e| StorageError::Corrupt {
                table: "analytics_events",
                detail: format!("invalid payload json: {e}"),
            })?;
            Ok(Some(payload))
        }
    }
}
