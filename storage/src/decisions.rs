//! Reviewer-decision persistence.

use crate::errors::StorageError;
use crate::records::{DecisionAction, DecisionRecord};
use crate::DbPool;

type DecisionRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    i64,
);

const COLUMNS: &str = "id, repository_id, workflow_id, comment_artifact_id, reviewer_id, \
                       action, context, feedback, created_at";

fn from_row(row: DecisionRow) -> Result<DecisionRecord, StorageError> {
    let action = DecisionAction::parse(&row.5).ok_or_else(|| StorageError::Corrupt {
        table: "decisions",
        detail: format!("unknown action {}", row.5),
    })?;
    let context = serde_json::from_str(&row.6).map_err(|e| StorageError::Corrupt {
        table: "decisions",
        detail: format!("invalid context json: {e}"),
    })?;
    Ok(DecisionRecord {
        id: row.0,
        repository_id: row.1,
        workflow_id: row.2,
        comment_artifact_id: row.3,
        reviewer_id: row.4,
        action,
        context,
        feedback: row.7,
        created_at: row.8,
    })
}

/// Persist a reviewer decision.
pub async fn insert(pool: &DbPool, decision: &DecisionRecord) -> Result<(), StorageError> {
    let context = serde_json::to_string(&decision.context).map_err(|e| StorageError::Corrupt {
        table: "decisions",
        detail: format!("unserializable context: {e}"),
    })?;

    sqlx::query(
        "INSERT INTO decisions \
         (id, repository_id, workflow_id, comment_artifact_id, reviewer_id, action, context, \
          feedback, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&decision.id)
    .bind(&decision.repository_id)
    .bind(&decision.workflow_id)
    .bind(&decision.comment_artifact_id)
    .bind(&decision.reviewer_id)
    .bind(decision.action.as_str())
    .bind(context)
    .bind(&decision.feedback)
    .bind(decision.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Decisions for one repository, oldest first.
pub async fn list_for_repo(
    pool: &DbPool,
    repository_id: &str,
) -> Result<Vec<DecisionRecord>, StorageError> {
    let rows: Vec<DecisionRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM decisions WHERE repository_id = ? ORDER BY created_at ASC"
    ))
    .bind(repository_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(from_row).collect()
}

/// Decisions attached to one workflow.
pub async fn list_for_workflow(
    pool: &DbPool,
    workflow_id: &str,
) -> Result<Vec<DecisionRecord>, StorageError> {
    let rows: Vec<DecisionRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM decisions WHERE workflow_id = ? ORDER BY created_at ASC"
    ))
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_ms;
    use serde_json::json;

    #[tokio::test]
    async fn insert_and_list_round_trip() {
        let pool = crate::init_test_db().await.expect("init db");

        let decision = DecisionRecord {
            id: "d1".to_string(),
            repository_id: "acme/widgets".to_string(),
            workflow_id: "w1".to_string(),
            comment_artifact_id: "a1".to_string(),
            reviewer_id: "alice".to_string(),
            action: DecisionAction::Dismissed,
            context: json!({"category": "STYLE", "severity": "LOW"}),
            feedback: Some("false positive".to_string()),
            created_at: now_ms(),
        };
        insert(&pool, &decision).await.expect("insert");

        let stored = list_for_repo(&pool, "acme/widgets").await.expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].action, DecisionAction::Dismissed);
        assert_eq!(stored[0].context["category"], "STYLE");
    }
}
