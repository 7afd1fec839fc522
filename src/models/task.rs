use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable status of a task, as stored in PostgreSQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Complete,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Complete => "complete",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "not_started" => Some(TaskStatus::NotStarted),
            "in_progress" => Some(TaskStatus::InProgress),
            "complete" => Some(TaskStatus::Complete),
            _ => None,
        }
    }
}

/// The slice of a task the coordination engine cares about. The CRUD surface
/// that creates and edits tasks lives elsewhere; here tasks are only looked
/// up for assignment guards and status flips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub status: TaskStatus,
}
