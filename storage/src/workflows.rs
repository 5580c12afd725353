//! Workflow persistence: inserts, status transitions, and resume queries.
//!
//! Transitions are checkpointed before side-effects run; every status write
//! also bumps `checkpoint_at` so the resume scan can spot stalled rows.

use crate::errors::StorageError;
use crate::records::{WorkflowRecord, WorkflowStatus};
use crate::{now_ms, DbPool};

type WorkflowRow = (
    String,
    String,
    i64,
    String,
    String,
    String,
    String,
    i64,
    String,
    i64,
    Option<i64>,
    Option<i64>,
    i64,
);

const COLUMNS: &str = "id, repository_id, pr_number, head_sha, base_sha, author_login, \
                       status, attempt, trigger_event_id, created_at, started_at, \
                       completed_at, checkpoint_at";

fn from_row(row: WorkflowRow) -> Result<WorkflowRecord, StorageError> {
    let status = WorkflowStatus::parse(&row.6).ok_or_else(|| StorageError::Corrupt {
        table: "workflows",
        detail: format!("unknown status {}", row.6),
    })?;
    Ok(WorkflowRecord {
        id: row.0,
        repository_id: row.1,
        pr_number: row.2,
        head_sha: row.3,
        base_sha: row.4,
        author_login: row.5,
        status,
        attempt: row.7,
        trigger_event_id: row.8,
        created_at: row.9,
        started_at: row.10,
        completed_at: row.11,
        checkpoint_at: row.12,
    })
}

/// Insert a new workflow (normally in `PENDING`).
pub async fn insert(pool: &DbPool, wf: &WorkflowRecord) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO workflows \
         (id, repository_id, pr_number, head_sha, base_sha, author_login, status, attempt, \
          trigger_event_id, created_at, started_at, completed_at, checkpoint_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&wf.id)
    .bind(&wf.repository_id)
    .bind(wf.pr_number)
    .bind(&wf.head_sha)
    .bind(&wf.base_sha)
    .bind(&wf.author_login)
    .bind(wf.status.as_str())
    .bind(wf.attempt)
    .bind(&wf.trigger_event_id)
    .bind(wf.created_at)
    .bind(wf.started_at)
    .bind(wf.completed_at)
    .bind(wf.checkpoint_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch a workflow by id.
pub async fn get(pool: &DbPool, id: &str) -> Result<WorkflowRecord, StorageError> {
    let row: Option<WorkflowRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM workflows WHERE id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
    let row = row.ok_or_else(|| StorageError::NotFound {
        entity: "workflow",
        id: id.to_string(),
    })?;
    from_row(row)
}

/// Transition a workflow to `status`, stamping the checkpoint.
///
/// `started_at` is set on the first transition into RUNNING; `completed_at`
/// is set on any terminal transition.
pub async fn set_status(
    pool: &DbPool,
    id: &str,
    status: WorkflowStatus,
) -> Result<(), StorageError> {
    let now = now_ms();
    let result = sqlx::query(
        "UPDATE workflows SET status = ?, checkpoint_at = ?, \
         started_at = CASE WHEN ? = 'RUNNING' AND started_at IS NULL THEN ? ELSE started_at END, \
         completed_at = CASE WHEN ? IN ('COMPLETED', 'FAILED', 'CANCELLED') THEN ? \
                        ELSE completed_at END \
         WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(now)
    .bind(status.as_str())
    .bind(now)
    .bind(status.as_str())
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound {
            entity: "workflow",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Fill in PR metadata learned after creation (base sha, author).
pub async fn set_pr_meta(
    pool: &DbPool,
    id: &str,
    base_sha: &str,
    author_login: &str,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE workflows SET base_sha = ?, author_login = ? WHERE id = ?")
        .bind(base_sha)
        .bind(author_login)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Refresh `checkpoint_at` without changing status (heartbeat during RUNNING).
pub async fn touch_checkpoint(pool: &DbPool, id: &str) -> Result<(), StorageError> {
    sqlx::query("UPDATE workflows SET checkpoint_at = ? WHERE id = ?")
        .bind(now_ms())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Increment the retry attempt counter.
pub async fn bump_attempt(pool: &DbPool, id: &str) -> Result<(), StorageError> {
    sqlx::query("UPDATE workflows SET attempt = attempt + 1, checkpoint_at = ? WHERE id = ?")
        .bind(now_ms())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// All non-terminal workflows for a `(repository, pr)` pair.
///
/// The supersession invariant allows at most one; the Vec shape lets the
/// engine repair any violation it finds.
pub async fn find_active_for_pr(
    pool: &DbPool,
    repository_id: &str,
    pr_number: i64,
) -> Result<Vec<WorkflowRecord>, StorageError> {
    let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM workflows \
         WHERE repository_id = ? AND pr_number = ? \
         AND status IN ('PENDING', 'RUNNING', 'AWAITING_REVIEW') \
         ORDER BY created_at ASC"
    ))
    .bind(repository_id)
    .bind(pr_number)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(from_row).collect()
}

/// RUNNING workflows whose last checkpoint is older than `stale_before`
/// (epoch ms). These are crash-resume candidates.
pub async fn find_stale_running(
    pool: &DbPool,
    stale_before: i64,
) -> Result<Vec<WorkflowRecord>, StorageError> {
    let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM workflows \
         WHERE status = 'RUNNING' AND checkpoint_at < ? \
         ORDER BY checkpoint_at ASC"
    ))
    .bind(stale_before)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(from_row).collect()
}

/// All PENDING workflows (startup re-dispatch).
pub async fn find_pending(pool: &DbPool) -> Result<Vec<WorkflowRecord>, StorageError> {
    let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM workflows WHERE status = 'PENDING' ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(from_row).collect()
}

/// Completed workflows for a repository (predictive-health training input).
pub async fn find_completed_for_repo(
    pool: &DbPool,
    repository_id: &str,
    limit: i64,
) -> Result<Vec<WorkflowRecord>, StorageError> {
    let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM workflows \
         WHERE repository_id = ? AND status = 'COMPLETED' \
         ORDER BY completed_at DESC LIMIT ?"
    ))
    .bind(repository_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_db;

    fn sample(id: &str, sha: &str, status: WorkflowStatus) -> WorkflowRecord {
        WorkflowRecord {
            id: id.to_string(),
            repository_id: "acme/widgets".to_string(),
            pr_number: 7,
            head_sha: sha.to_string(),
            base_sha: "base".to_string(),
            author_login: "octocat".to_string(),
            status,
            attempt: 0,
            trigger_event_id: format!("evt-{id}"),
            created_at: now_ms(),
            started_at: None,
            completed_at: None,
            checkpoint_at: now_ms(),
        }
    }

    #[tokio::test]
    async fn transitions_stamp_timestamps() {
        let pool = init_test_db().await.expect("init db");
        insert(&pool, &sample("w1", "sha-a", WorkflowStatus::Pending))
            .await
            .expect("insert");

        set_status(&pool, "w1", WorkflowStatus::Running)
            .await
            .expect("to running");
        let wf = get(&pool, "w1").await.expect("get");
        assert_eq!(wf.status, WorkflowStatus::Running);
        assert!(wf.started_at.is_some());
        assert!(wf.completed_at.is_none());

        set_status(&pool, "w1", WorkflowStatus::Completed)
            .await
            .expect("to completed");
        let wf = get(&pool, "w1").await.expect("get");
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert!(wf.completed_at.is_some());
    }

    #[tokio::test]
    async fn active_lookup_excludes_terminal_rows() {
        let pool = init_test_db().await.expect("init db");
        insert(&pool, &sample("w1", "sha-a", WorkflowStatus::Cancelled))
            .await
            .expect("insert w1");
        insert(&pool, &sample("w2", "sha-b", WorkflowStatus::Running))
            .await
            .expect("insert w2");

        let active = find_active_for_pr(&pool, "acme/widgets", 7)
            .await
            .expect("query");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "w2");
    }

    #[tokio::test]
    async fn stale_running_scan_honors_cutoff() {
        let pool = init_test_db().await.expect("init db");
        let mut wf = sample("w1", "sha-a", WorkflowStatus::Running);
        wf.checkpoint_at = now_ms() - 11 * 60 * 1000;
        insert(&pool, &wf).await.expect("insert");

        let stale = find_stale_running(&pool, now_ms() - 10 * 60 * 1000)
            .await
            .expect("scan");
        assert_eq!(stale.len(), 1);

        touch_checkpoint(&pool, "w1").await.expect("touch");
        let stale = find_stale_running(&pool, now_ms() - 10 * 60 * 1000)
            .await
            .expect("scan again");
        assert!(stale.is_empty());
    }
}
