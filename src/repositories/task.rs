use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::task::{Task, TaskStatus},
};

/// A helper function to map a `tokio_postgres::Row` to a `Task`.
fn row_to_task(row: &Row) -> Result<Task> {
    let status: String = row
        .try_get("status")
        .map_err(|_| AppError::Internal("tasks row missing status".to_string()))?;
    Ok(Task {
        id: row
            .try_get("id")
            .map_err(|_| AppError::Internal("tasks row missing id".to_string()))?,
        user_id: row
            .try_get("user_id")
            .map_err(|_| AppError::Internal("tasks row missing user_id".to_string()))?,
        title: row
            .try_get("title")
            .map_err(|_| AppError::Internal("tasks row missing title".to_string()))?,
        status: TaskStatus::from_str(&status)
            .ok_or_else(|| AppError::Internal(format!("Unknown task status: {}", status)))?,
    })
}

/// Finds a task by id, scoped to its owner. Returns `None` both when the
/// task does not exist and when it belongs to someone else, so callers
/// cannot distinguish (and leak) the two.
pub async fn find_for_user(pool: &Pool, user_id: Uuid, task_id: Uuid) -> Result<Option<Task>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            SELECT id, user_id, title, status
            FROM tasks
            WHERE id = $1 AND user_id = $2
            "#,
            &[&task_id, &user_id],
        )
        .await?;
    row.map(|r| row_to_task(&r)).transpose()
}

/// Flips a task's durable status (first `start` -> in_progress, cancel ->
/// not_started).
pub async fn set_status(pool: &Pool, task_id: Uuid, status: TaskStatus) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            UPDATE tasks
            SET status = $1, updated_at = NOW()
            WHERE id = $2
            "#,
            &[&status.as_str(), &task_id],
        )
        .await?;
    Ok(())
}

/// Whether a committed durable session already exists for the task.
pub async fn has_committed_session(pool: &Pool, task_id: Uuid) -> Result<bool> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM dash_sessions WHERE task_id = $1
            ) AS present
            "#,
            &[&task_id],
        )
        .await?;
    Ok(row.try_get("present").unwrap_or(false))
}
