//! Preference-model and repository-settings persistence.
//!
//! Preference models are append-only for audit history; `latest_for_repo`
//! picks the newest row by `(created_at, id)`. The payload column holds the
//! serialized model (the learning crate owns its schema).

use crate::errors::StorageError;
use crate::records::RepoSettingsRecord;
use crate::{now_ms, DbPool};

/// Append a new preference-model version for a repository.
pub async fn append_model(
    pool: &DbPool,
    repository_id: &str,
    version: i64,
    payload: &serde_json::Value,
) -> Result<(), StorageError> {
    let payload = serde_json::to_string(payload).map_err(|e| StorageError::Corrupt {
        table: "preference_models",
        detail: format!("unserializable payload: {e}"),
    })?;

    sqlx::query(
        "INSERT INTO preference_models (repository_id, version, payload, created_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(repository_id)
    .bind(version)
    .bind(payload)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(())
}

/// Latest persisted model payload for a repository, if any.
pub async fn latest_for_repo(
    pool: &DbPool,
    repository_id: &str,
) -> Result<Option<(i64, serde_json::Value)>, StorageError> {
    let row: Option<(i64, String)> = sqlx::query_as(
        "SELECT version, payload FROM preference_models \
         WHERE repository_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
    )
    .bind(repository_id)
    .fetch_optional(pool)
    .await?;

    match row {
        None => Ok(None),
        Some((version, payload)) => {
            let payload = serde_json::from_str(&payload).map_err(|e| StorageError::Corrupt {
                table: "preference_models",
                detail: format!("invalid payload json: {e}"),
            })?;
            Ok(Some((version, payload)))
        }
    }
}

/// Repository settings; defaults to enabled-with-no-filters when absent.
pub async fn repo_settings(
    pool: &DbPool,
    repository_id: &str,
) -> Result<RepoSettingsRecord, StorageError> {
    let row: Option<(String, i64, Option<String>, String, i64)> = sqlx::query_as(
        "SELECT repository_id, enabled, exclude_branches, include_paths, updated_at \
         FROM repo_settings WHERE repository_id = ?",
    )
    .bind(repository_id)
    .fetch_optional(pool)
    .await?;

    match row {
        None => Ok(RepoSettingsRecord::default_for(repository_id)),
        Some((repository_id, enabled, exclude_branches, include_paths, updated_at)) => {
            let include_paths =
                serde_json::from_str(&include_paths).map_err(|e| StorageError::Corrupt {
                    table: "repo_settings",
                    detail: format!("invalid include_paths json: {e}"),
                })?;
            Ok(RepoSettingsRecord {
                repository_id,
                enabled: enabled != 0,
                exclude_branches,
                include_paths,
                updated_at,
            })
        }
    }
}

/// Upsert repository settings.
pub async fn put_repo_settings(
    pool: &DbPool,
    settings: &RepoSettingsRecord,
) -> Result<(), StorageError> {
    let include_paths =
        serde_json::to_string(&settings.include_paths).map_err(|e| StorageError::Corrupt {
            table: "repo_settings",
            detail: format!("unserializable include_paths: {e}"),
        })?;

    sqlx::query(
        "INSERT INTO repo_settings (repository_id, enabled, exclude_branches, include_paths, \
         updated_at) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (repository_id) DO UPDATE SET \
           enabled = excluded.enabled, \
           exclude_branches = excluded.exclude_branches, \
           include_paths = excluded.include_paths, \
           updated_at = excluded.updated_at",
    )
    .bind(&settings.repository_id)
    .bind(settings.enabled as i64)
    .bind(&settings.exclude_branches)
    .bind(include_paths)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn latest_model_wins() {
        let pool = crate::init_test_db().await.expect("init db");

        append_model(&pool, "acme/widgets", 1, &json!({"v": 1}))
            .await
            .expect("v1");
        append_model(&pool, "acme/widgets", 2, &json!({"v": 2}))
            .await
            .expect("v2");

        let (version, payload) = latest_for_repo(&pool, "acme/widgets")
            .await
            .expect("query")
            .expect("present");
        assert_eq!(version, 2);
        assert_eq!(payload["v"], 2);

        assert!(latest_for_repo(&pool, "other/repo")
            .await
            .expect("query")
            .is_none());
    }

    #[tokio::test]
    async fn settings_default_then_upsert() {
        let pool = crate::init_test_db().await.expect("init db");

        let defaults = repo_settings(&pool, "acme/widgets").await.expect("get");
        assert!(defaults.enabled);
        assert!(defaults.include_paths.is_empty());

        let custom = RepoSettingsRecord {
            repository_id: "acme/widgets".to_string(),
            enabled: false,
            exclude_branches: Some("^release/.*$".to_string()),
            include_paths: vec!["src/".to_string()],
            updated_at: now_ms(),
        };
        put_repo_settings(&pool, &custom).await.expect("put");

        let stored = repo_settings(&pool, "acme/widgets").await.expect("get");
        assert!(!stored.enabled);
        assert_eq!(stored.exclude_branches.as_deref(), Some("^release/.*$"));
        assert_eq!(stored.include_paths, vec!["src/".to_string()]);
    }
}
