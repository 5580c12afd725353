//! Agent-run persistence.
//!
//! One row per `(workflow, agent)`; `upsert` keeps re-queues idempotent.
//! A SUCCEEDED row's output is immutable: the upsert refuses to downgrade it.

use crate::errors::StorageError;
use crate::records::{AgentRunRecord, AgentRunStatus};
use crate::DbPool;

type AgentRunRow = (
    String,
    String,
    String,
    String,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<String>,
);

const COLUMNS: &str =
    "id, workflow_id, agent_name, status, started_at, finished_at, latency_ms, error, output";

fn from_row(row: AgentRunRow) -> Result<AgentRunRecord, StorageError> {
    let status = AgentRunStatus::parse(&row.3).ok_or_else(|| StorageError::Corrupt {
        table: "agent_runs",
        detail: format!("unknown status {}", row.3),
    })?;
    let output = match row.8 {
        Some(raw) => Some(
            serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
                table: "agent_runs",
                detail: format!("invalid output json: {e}"),
            })?,
        ),
        None => None,
    };
    Ok(AgentRunRecord {
        id: row.0,
        workflow_id: row.1,
        agent_name: row.2,
        status,
        started_at: row.4,
        finished_at: row.5,
        latency_ms: row.6,
        error: row.7,
        output,
    })
}

/// Insert or update the run for `(workflow_id, agent_name)`.
///
/// An existing SUCCEEDED row is left untouched so re-runs reuse the original
/// output instead of overwriting it.
pub async fn upsert(pool: &DbPool, run: &AgentRunRecord) -> Result<(), StorageError> {
    let output = run
        .output
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StorageError::Corrupt {
            table: "agent_runs",
            detail: format!("unserializable output: {e}"),
        })?;

    sqlx::query(
        "INSERT INTO agent_runs \
         (id, workflow_id, agent_name, status, started_at, finished_at, latency_ms, error, output) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (workflow_id, agent_name) DO UPDATE SET \
           status = excluded.status, \
           started_at = excluded.started_at, \
           finished_at = excluded.finished_at, \
           latency_ms = excluded.latency_ms, \
           error = excluded.error, \
           output = excluded.output \
         WHERE agent_runs.status != 'SUCCEEDED'",
    )
    .bind(&run.id)
    .bind(&run.workflow_id)
    .bind(&run.agent_name)
    .bind(run.status.as_str())
    .bind(run.started_at)
    .bind(run.finished_at)
    .bind(run.latency_ms)
    .bind(&run.error)
    .bind(output)
    .execute(pool)
    .await?;
    Ok(())
}

/// All runs for a workflow, in insertion order.
pub async fn list_for_workflow(
    pool: &DbPool,
    workflow_id: &str,
) -> Result<Vec<AgentRunRecord>, StorageError> {
    let rows: Vec<AgentRunRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM agent_runs WHERE workflow_id = ? ORDER BY rowid ASC"
    ))
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(from_row).collect()
}

/// Only the SUCCEEDED runs for a workflow (resume input).
pub async fn list_succeeded(
    pool: &DbPool,
    workflow_id: &str,
) -> Result<Vec<AgentRunRecord>, StorageError> {
    let rows: Vec<AgentRunRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM agent_runs \
         WHERE workflow_id = ? AND status = 'SUCCEEDED' ORDER BY rowid ASC"
    ))
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_db;
    use serde_json::json;

    fn sample(agent: &str, status: AgentRunStatus) -> AgentRunRecord {
        AgentRunRecord {
            id: format!("run-{agent}"),
            workflow_id: "w1".to_string(),
            agent_name: agent.to_string(),
            status,
            started_at: Some(1),
            finished_at: Some(2),
            latency_ms: Some(1),
            error: None,
            output: Some(json!({"ok": true})),
        }
    }

    #[tokio::test]
    async fn succeeded_output_is_immutable() {
        let pool = init_test_db().await.expect("init db");
        upsert(&pool, &sample("risk", AgentRunStatus::Succeeded))
            .await
            .expect("first");

        let mut overwrite = sample("risk", AgentRunStatus::Failed);
        overwrite.output = Some(json!({"ok": false}));
        upsert(&pool, &overwrite).await.expect("second");

        let runs = list_for_workflow(&pool, "w1").await.expect("list");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, AgentRunStatus::Succeeded);
        assert_eq!(runs[0].output, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn non_succeeded_rows_are_replaced() {
        let pool = init_test_db().await.expect("init db");
        upsert(&pool, &sample("review", AgentRunStatus::Running))
            .await
            .expect("first");
        upsert(&pool, &sample("review", AgentRunStatus::Succeeded))
            .await
            .expect("second");

        let succeeded = list_succeeded(&pool, "w1").await.expect("list");
        assert_eq!(succeeded.len(), 1);
        assert_eq!(succeeded[0].agent_name, "review");
    }
}
