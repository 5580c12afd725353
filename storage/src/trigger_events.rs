//! Trigger-event persistence: the at-least-once → at-most-once bridge.
//!
//! `delivery_id` is the primary key; a second insert with the same id is a
//! no-op and reported as such so the gateway can acknowledge duplicates.

use crate::errors::StorageError;
use crate::records::{TriggerAction, TriggerEventRecord};
use crate::DbPool;

/// Insert a trigger event; returns `false` when the delivery id was already
/// stored (duplicate webhook).
pub async fn insert_if_new(
    pool: &DbPool,
    event: &TriggerEventRecord,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO trigger_events \
         (delivery_id, action, repository_id, pr_number, head_sha, received_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.delivery_id)
    .bind(event.action.as_str())
    .bind(&event.repository_id)
    .bind(event.pr_number)
    .bind(&event.head_sha)
    .bind(event.received_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Fetch a trigger event by delivery id.
pub async fn get(pool: &DbPool, delivery_id: &str) -> Result<TriggerEventRecord, StorageError> {
    let row: Option<(String, String, String, i64, String, i64)> = sqlx::query_as(
        "SELECT delivery_id, action, repository_id, pr_number, head_sha, received_at \
         FROM trigger_events WHERE delivery_id = ?",
    )
    .bind(delivery_id)
    .fetch_optional(pool)
    .await?;

    let (delivery_id, action, repository_id, pr_number, head_sha, received_at) =
        row.ok_or_else(|| StorageError::NotFound {
            entity: "trigger_event",
            id: delivery_id.to_string(),
        })?;

    let action = TriggerAction::parse(&action).ok_or_else(|| StorageError::Corrupt {
        table: "trigger_events",
        detail: format!("unknown action {action}"),
    })?;

    Ok(TriggerEventRecord {
        delivery_id,
        action,
        repository_id,
        pr_number,
        head_sha,
        received_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_test_db;
    use crate::now_ms;

    fn sample(delivery_id: &str) -> TriggerEventRecord {
        TriggerEventRecord {
            delivery_id: delivery_id.to_string(),
            action: TriggerAction::Opened,
            repository_id: "acme/widgets".to_string(),
            pr_number: 7,
            head_sha: "a".repeat(40),
            received_at: now_ms(),
        }
    }

    #[tokio::test]
    async fn duplicate_delivery_ids_are_ignored() {
        let pool = init_test_db().await.expect("init db");

        assert!(insert_if_new(&pool, &sample("X")).await.expect("first"));
        assert!(!insert_if_new(&pool, &sample("X")).await.expect("second"));

        let stored = get(&pool, "X").await.expect("get");
        assert_eq!(stored.pr_number, 7);
    }
}
