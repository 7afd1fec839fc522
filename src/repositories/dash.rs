//! The ephemeral session store: one live `DashSession` per user.
//!
//! Keyed by `user_id`, not `session_id`, because the invariant is "one live
//! session per user". Mutations here are plain read-modify-write; per-user
//! atomicity is provided by the coordinator, which holds the user's lock
//! across every store operation and the resulting fan-out.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::event::SessionEvent;
use crate::models::session::{DashSession, SessionStatus};

/// Contract of the ephemeral store. Production wiring is Redis; tests use an
/// in-memory fake so isolated coordinators need no external services.
#[async_trait]
pub trait DashStore: Send + Sync {
    /// Idempotent create-or-get: returns the user's existing live session or
    /// creates a fresh one.
    async fn create_or_get(&self, user_id: Uuid) -> Result<DashSession>;

    /// The user's live session, if any.
    async fn get(&self, user_id: Uuid) -> Result<Option<DashSession>>;

    /// Appends one event to the log. `None` when no record exists.
    async fn add_event(&self, user_id: Uuid, event: SessionEvent) -> Result<Option<DashSession>>;

    /// Assigns a task and moves the status to `initialized_with_task` when
    /// the session had not started yet. `None` when no record exists.
    async fn assign_task(&self, user_id: Uuid, task_id: Uuid) -> Result<Option<DashSession>>;

    /// Clears the assigned task. `None` when no record exists.
    async fn unassign_task(&self, user_id: Uuid) -> Result<Option<DashSession>>;

    /// Overwrites the lifecycle status. `None` when no record exists.
    async fn mark_status(
        &self,
        user_id: Uuid,
        status: SessionStatus,
    ) -> Result<Option<DashSession>>;

    /// Deletes the record. Returns whether one existed.
    async fn delete(&self, user_id: Uuid) -> Result<bool>;
}

/// Redis-backed implementation, value-encoded as JSON under `dash:{user_id}`.
#[derive(Clone)]
pub struct RedisDashStore {
    redis: ConnectionManager,
}

impl RedisDashStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn key(user_id: Uuid) -> String {
        format!("dash:{}", user_id)
    }

    async fn read(&self, user_id: Uuid) -> Result<Option<DashSession>> {
        let mut redis = self.redis.clone();
        let raw: Option<String> = redis.get(Self::key(user_id)).await?;
        raw.map(|json| {
            sonic_rs::from_str(&json)
                .map_err(|e| AppError::Serialization(format!("Corrupt dash record: {}", e)))
        })
        .transpose()
    }

    async fn write(&self, session: &DashSession) -> Result<()> {
        let mut redis = self.redis.clone();
        let json = sonic_rs::to_string(session)
            .map_err(|e| AppError::Serialization(format!("Dash record encoding failed: {}", e)))?;
        let _: () = redis.set(Self::key(session.user_id), json).await?;
        Ok(())
    }

    /// Read-mutate-write helper shared by the mutating operations.
    async fn update<F>(&self, user_id: Uuid, mutate: F) -> Result<Option<DashSession>>
    where
        F: FnOnce(&mut DashSession) + Send,
    {
        let Some(mut session) = self.read(user_id).await? else {
            return Ok(None);
        };
        mutate(&mut session);
        self.write(&session).await?;
        Ok(Some(session))
    }
}

#[async_trait]
impl DashStore for RedisDashStore {
    async fn create_or_get(&self, user_id: Uuid) -> Result<DashSession> {
        if let Some(existing) = self.read(user_id).await? {
            return Ok(existing);
        }

        let session = DashSession::new(user_id);
        let json = sonic_rs::to_string(&session)
            .map_err(|e| AppError::Serialization(format!("Dash record encoding failed: {}", e)))?;

        // SET NX so a concurrent creator from another coordinator process
        // wins cleanly; re-read on loss.
        let mut redis = self.redis.clone();
        let created: bool = redis.set_nx(Self::key(user_id), json).await?;
        if created {
            tracing::debug!("Created dash session {} for user {}", session.session_id, user_id);
            return Ok(session);
        }

        self.read(user_id)
            .await?
            .ok_or_else(|| AppError::Internal("Dash record vanished after SET NX race".into()))
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<DashSession>> {
        self.read(user_id).await
    }

    async fn add_event(&self, user_id: Uuid, event: SessionEvent) -> Result<Option<DashSession>> {
        self.update(user_id, move |session| session.events.push(event))
            .await
    }

    async fn assign_task(&self, user_id: Uuid, task_id: Uuid) -> Result<Option<DashSession>> {
        self.update(user_id, move |session| {
            session.task_id = Some(task_id);
            if session.status == SessionStatus::InitializedNoTask {
                session.status = SessionStatus::InitializedWithTask;
            }
        })
        .await
    }

    async fn unassign_task(&self, user_id: Uuid) -> Result<Option<DashSession>> {
        self.update(user_id, |session| {
            session.task_id = None;
            if session.status == SessionStatus::InitializedWithTask {
                session.status = SessionStatus::InitializedNoTask;
            }
        })
        .await
    }

    async fn mark_status(
        &self,
        user_id: Uuid,
        status: SessionStatus,
    ) -> Result<Option<DashSession>> {
        self.update(user_id, move |session| session.status = status)
            .await
    }

    async fn delete(&self, user_id: Uuid) -> Result<bool> {
        let mut redis = self.redis.clone();
        let removed: i64 = redis.del(Self::key(user_id)).await?;
        Ok(removed > 0)
    }
}
