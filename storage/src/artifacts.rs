//! Artifact persistence.
//!
//! Artifacts are content-addressed by `(workflow_id, kind, content_hash)`;
//! re-inserting the same content is a no-op, which is what makes re-publish
//! after a retry idempotent.

use crate::errors::StorageError;
use crate::records::{ArtifactKind, ArtifactRecord};
use crate::{now_ms, DbPool};

type ArtifactRow = (
    String,
    String,
    String,
    String,
    String,
    Option<i64>,
    Option<String>,
);

const COLUMNS: &str = "id, workflow_id, kind, payload, content_hash, published_at, external_id";

fn from_row(row: ArtifactRow) -> Result<ArtifactRecord, StorageError> {
    let kind = ArtifactKind::parse(&row.2).ok_or_else(|| StorageError::Corrupt {
        table: "artifacts",
        detail: format!("unknown kind {}", row.2),
    })?;
    let payload = serde_json::from_str(&row.3).map_err(|e| StorageError::Corrupt {
        table: "artifacts",
        detail: format!("invalid payload json: {e}"),
    })?;
    Ok(ArtifactRecord {
        id: row.0,
        workflow_id: row.1,
        kind,
        payload,
        content_hash: row.4,
        published_at: row.5,
        external_id: row.6,
    })
}

/// Insert an artifact; duplicate content is ignored. Returns the stored row
/// (the pre-existing one on a duplicate).
pub async fn insert(pool: &DbPool, artifact: &ArtifactRecord) -> Result<ArtifactRecord, StorageError> {
    let payload = serde_json::to_string(&artifact.payload).map_err(|e| StorageError::Corrupt {
        table: "artifacts",
        detail: format!("unserializable payload: {e}"),
    })?;

    sqlx::query(
        "INSERT OR IGNORE INTO artifacts \
         (id, workflow_id, kind, payload, content_hash, published_at, external_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&artifact.id)
    .bind(&artifact.workflow_id)
    .bind(artifact.kind.as_str())
    .bind(payload)
    .bind(&artifact.content_hash)
    .bind(artifact.published_at)
    .bind(&artifact.external_id)
    .execute(pool)
    .await?;

    let row: Option<ArtifactRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM artifacts \
         WHERE workflow_id = ? AND kind = ? AND content_hash = ?"
    ))
    .bind(&artifact.workflow_id)
    .bind(artifact.kind.as_str())
    .bind(&artifact.content_hash)
    .fetch_optional(pool)
    .await?;

    let row = row.ok_or_else(|| StorageError::NotFound {
        entity: "artifact",
        id: artifact.id.clone(),
    })?;
    from_row(row)
}

/// Mark an artifact as published with the provider's external id.
pub async fn mark_published(
    pool: &DbPool,
    id: &str,
    external_id: &str,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE artifacts SET published_at = ?, external_id = ? WHERE id = ?")
        .bind(now_ms())
        .bind(external_id)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Fetch an artifact by id.
pub async fn get(pool: &DbPool, id: &str) -> Result<ArtifactRecord, StorageError> {
    let row: Option<ArtifactRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM artifacts WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
    let row = row.ok_or_else(|| StorageError::NotFound {
        entity: "artifact",
        id: id.to_string(),
    })?;
    from_row(row)
}

/// All artifacts for a workflow.
pub async fn list_for_workflow(
    pool: &DbPool,
    workflow_id: &str,
) -> Result<Vec<ArtifactRecord>, StorageError> {
    let rows: Vec<ArtifactRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM artifacts WHERE workflow_id = ? ORDER BY rowid ASC"
    ))
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(from_row).collect()
}

/// Artifacts that still lack an `external_id` (pending publishes, retried on
/// workflow resume).
pub async fn list_unpublished(
    pool: &DbPool,
    workflow_id: &str,
) -> Result<Vec<ArtifactRecord>, StorageError> {
    let rows: Vec<ArtifactRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM artifacts \
         WHERE workflow_id = ? AND external_id IS NULL ORDER BY rowid ASC"
    ))
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(id: &str, hash: &str) -> ArtifactRecord {
        ArtifactRecord {
            id: id.to_string(),
            workflow_id: "w1".to_string(),
            kind: ArtifactKind::SummaryComment,
            payload: json!({"markdown": "## Summary"}),
            content_hash: hash.to_string(),
            published_at: None,
            external_id: None,
        }
    }

    #[tokio::test]
    async fn duplicate_content_returns_original_row() {
        let pool = crate::init_test_db().await.expect("init db");

        let first = insert(&pool, &sample("a1", "hash-1")).await.expect("first");
        let second = insert(&pool, &sample("a2", "hash-1")).await.expect("second");

        assert_eq!(first.id, "a1");
        assert_eq!(second.id, "a1");
        assert_eq!(list_for_workflow(&pool, "w1").await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn publish_marks_and_clears_pending() {
        let pool = crate::init_test_db().await.expect("init db");
        let stored = insert(&pool, &sample("a1", "hash-1")).await.expect("insert");

        assert_eq!(list_unpublished(&pool, "w1").await.expect("pending").len(), 1);

        mark_published(&pool, &stored.id, "ext-99")
            .await
            .expect("publish");

        assert!(list_unpublished(&pool, "w1").await.expect("pending").is_empty());
        let got = get(&pool, &stored.id).await.expect("get");
        assert_eq!(got.external_id.as_deref(), Some("ext-99"));
        assert!(got.published_at.is_some());
    }
}
