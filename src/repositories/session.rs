//! The durable session store: the commit boundary between the ephemeral
//! record and PostgreSQL.
//!
//! `persist_completed_session` is the only path by which a session becomes
//! durable. The write is a single statement; "already persisted" is
//! distinguishable from a storage failure so the coordinator knows whether
//! the ephemeral record is safe to delete.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use deadpool_postgres::Pool;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::session::DashSession;
use crate::models::task::{Task, TaskStatus};
use crate::models::timers::{reconstruct, Timers};
use crate::repositories::task as task_repo;

/// Outcome of a durable commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The record was written.
    Created,
    /// A record with this session id already exists; the ephemeral copy is
    /// safe to delete.
    AlreadyPersisted,
}

/// Durable-side contract used by the coordinator: the commit operation plus
/// the task lookups backing the assignment guards and status flips.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn persist_completed_session(&self, session: &DashSession) -> Result<PersistOutcome>;
    async fn task_for_user(&self, user_id: Uuid, task_id: Uuid) -> Result<Option<Task>>;
    async fn task_has_committed_session(&self, task_id: Uuid) -> Result<bool>;
    async fn set_task_status(&self, task_id: Uuid, status: TaskStatus) -> Result<()>;
}

/// The validated, computed snapshot that gets written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTotals {
    pub task_id: Uuid,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
    pub timers: Timers,
}

/// Validates the invariants required for a durable commit and computes the
/// final counters. Pure so the rules are testable without a database.
///
/// Required: a task is assigned, the first stopwatch event is `start`, and
/// event timestamps are monotonic (non-decreasing).
pub fn validate_for_persist(session: &DashSession) -> Result<SessionTotals> {
    let task_id = session
        .task_id
        .ok_or_else(|| AppError::Internal("Cannot persist a session with no task".to_string()))?;

    let first_stopwatch = session
        .events
        .iter()
        .find(|e| matches!(e, crate::models::event::SessionEvent::Stopwatch { .. }));
    match first_stopwatch {
        Some(event) if event.is_stopwatch_start() => {}
        _ => {
            return Err(AppError::Internal(
                "Cannot persist a session that was never started".to_string(),
            ));
        }
    }

    let mut last_ts = i64::MIN;
    for event in &session.events {
        let ts = event.timestamp_ms();
        if ts < last_ts {
            return Err(AppError::Internal(
                "Event log is not monotonically ordered".to_string(),
            ));
        }
        last_ts = ts;
    }

    let started_at_ms = session
        .events
        .iter()
        .find(|e| e.is_stopwatch_start())
        .map(|e| e.timestamp_ms())
        .unwrap_or(0);
    let finished_at_ms = last_ts;

    let report = reconstruct(&session.events, finished_at_ms);

    Ok(SessionTotals {
        task_id,
        started_at_ms,
        finished_at_ms,
        timers: report.timers,
    })
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// PostgreSQL implementation over the shared deadpool pool.
#[derive(Clone)]
pub struct PgDurableStore {
    db: Pool,
}

impl PgDurableStore {
    pub fn new(db: Pool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn persist_completed_session(&self, session: &DashSession) -> Result<PersistOutcome> {
        let totals = validate_for_persist(session)?;
        let events = serde_json::to_value(&session.events)
            .map_err(|e| AppError::Serialization(format!("Event log encoding failed: {}", e)))?;

        let started_at = ms_to_datetime(totals.started_at_ms);
        let finished_at = ms_to_datetime(totals.finished_at_ms);

        let client = self.db.get().await?;
        let written = client
            .execute(
                r#"
                INSERT INTO dash_sessions
                    (id, user_id, task_id, started_at, finished_at,
                     work_ms, break_ms, total_ms, events)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (id) DO NOTHING
                "#,
                &[
                    &session.session_id,
                    &session.user_id,
                    &totals.task_id,
                    &started_at,
                    &finished_at,
                    &totals.timers.work_ms,
                    &totals.timers.break_ms,
                    &totals.timers.total_ms,
                    &events,
                ],
            )
            .await?;

        if written == 0 {
            tracing::debug!("Session {} already persisted", session.session_id);
            return Ok(PersistOutcome::AlreadyPersisted);
        }

        tracing::info!(
            "✅ Session {} committed to durable storage (work={}ms, break={}ms)",
            session.session_id,
            totals.timers.work_ms,
            totals.timers.break_ms
        );
        Ok(PersistOutcome::Created)
    }

    async fn task_for_user(&self, user_id: Uuid, task_id: Uuid) -> Result<Option<Task>> {
        task_repo::find_for_user(&self.db, user_id, task_id).await
    }

    async fn task_has_committed_session(&self, task_id: Uuid) -> Result<bool> {
        task_repo::has_committed_session(&self.db, task_id).await
    }

    async fn set_task_status(&self, task_id: Uuid, status: TaskStatus) -> Result<()> {
        task_repo::set_status(&self.db, task_id, status).await
    }
}
