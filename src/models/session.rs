use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::models::event::SessionEvent;

/// Lifecycle states of a live dash session.
///
/// The `idle` state has no representation here: it is the absence of an
/// ephemeral record. A record is created by `INIT` and destroyed either by
/// a successful durable commit after `COMPLETE` or by `CANCEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InitializedNoTask,
    InitializedWithTask,
    Active,
    Completed,
}

impl SessionStatus {
    /// Whether the session has been created but not yet started.
    pub fn is_initialized(&self) -> bool {
        matches!(
            self,
            SessionStatus::InitializedNoTask | SessionStatus::InitializedWithTask
        )
    }
}

/// The authoritative ephemeral record of a live work session ("dash").
///
/// Exactly one of these exists per user at a time, keyed by `user_id` in the
/// ephemeral store. `events` is append-only for the lifetime of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashSession {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub task_id: Option<Uuid>,
    pub status: SessionStatus,
    pub events: Vec<SessionEvent>,
}

impl DashSession {
    /// A freshly initialized session with no task and no events.
    pub fn new(user_id: Uuid) -> Self {
        DashSession {
            session_id: Uuid::new_v4(),
            user_id,
            task_id: None,
            status: SessionStatus::InitializedNoTask,
            events: Vec::new(),
        }
    }

    /// State-machine guard for event ingestion.
    ///
    /// A `stopwatch:start` is only legal as the bootstrap transition out of
    /// an initialized state; every other event requires `active`. A stray
    /// `start` while already active is rejected rather than re-opening the
    /// bootstrap path.
    pub fn ensure_event_allowed(&self, event: &SessionEvent) -> Result<(), ErrorCode> {
        if event.is_stopwatch_start() {
            if self.status.is_initialized() {
                Ok(())
            } else {
                Err(ErrorCode::SessionNotActive)
            }
        } else if self.status == SessionStatus::Active {
            Ok(())
        } else {
            Err(ErrorCode::SessionNotActive)
        }
    }

    /// Guard for `ASSIGN_TASK`: at most one task may be assigned at a time.
    pub fn ensure_assignable(&self) -> Result<(), ErrorCode> {
        if self.task_id.is_some() {
            return Err(ErrorCode::TaskAlreadyAssigned);
        }
        Ok(())
    }

    /// Guard for `UNASSIGN_TASK`: requires a task currently assigned.
    pub fn ensure_unassignable(&self) -> Result<(), ErrorCode> {
        if self.task_id.is_none() {
            return Err(ErrorCode::NoTaskAssigned);
        }
        Ok(())
    }

    /// Guard for `COMPLETE`.
    ///
    /// A session with no task cannot be completed. `completed` is accepted
    /// again so a client can retry after a failed durable commit without the
    /// already-passed guards being re-litigated.
    pub fn ensure_completable(&self) -> Result<(), ErrorCode> {
        if self.task_id.is_none() {
            return Err(ErrorCode::NoTaskAssigned);
        }
        match self.status {
            SessionStatus::Active | SessionStatus::Completed => Ok(()),
            SessionStatus::InitializedNoTask | SessionStatus::InitializedWithTask => {
                Err(ErrorCode::SessionNotActive)
            }
        }
    }

    /// Guard for ownership of the record.
    pub fn ensure_owned_by(&self, user_id: Uuid) -> Result<(), ErrorCode> {
        if self.user_id != user_id {
            return Err(ErrorCode::UnauthorizedSession);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{BrowserAction, StopwatchAction};

    fn start(ts: i64) -> SessionEvent {
        SessionEvent::stopwatch(StopwatchAction::Start, ts)
    }

    #[test]
    fn bootstrap_start_allowed_from_initialized() {
        let session = DashSession::new(Uuid::new_v4());
        assert_eq!(session.status, SessionStatus::InitializedNoTask);
        assert!(session.ensure_event_allowed(&start(0)).is_ok());

        let mut with_task = DashSession::new(Uuid::new_v4());
        with_task.status = SessionStatus::InitializedWithTask;
        assert!(with_task.ensure_event_allowed(&start(0)).is_ok());
    }

    #[test]
    fn stray_start_while_active_is_rejected() {
        let mut session = DashSession::new(Uuid::new_v4());
        session.status = SessionStatus::Active;
        assert_eq!(
            session.ensure_event_allowed(&start(5)),
            Err(ErrorCode::SessionNotActive)
        );
    }

    #[test]
    fn non_start_events_require_active() {
        let mut session = DashSession::new(Uuid::new_v4());
        let browser = SessionEvent::Browser {
            action: BrowserAction::TabClose,
            timestamp_ms: 10,
        };

        assert_eq!(
            session.ensure_event_allowed(&browser),
            Err(ErrorCode::SessionNotActive)
        );

        session.status = SessionStatus::Active;
        assert!(session.ensure_event_allowed(&browser).is_ok());
    }

    #[test]
    fn completion_requires_a_task() {
        let mut session = DashSession::new(Uuid::new_v4());
        session.status = SessionStatus::Active;
        assert_eq!(session.ensure_completable(), Err(ErrorCode::NoTaskAssigned));

        session.task_id = Some(Uuid::new_v4());
        assert!(session.ensure_completable().is_ok());

        // Retry after a failed durable commit is permitted.
        session.status = SessionStatus::Completed;
        assert!(session.ensure_completable().is_ok());
    }

    #[test]
    fn assignment_is_exclusive() {
        let mut session = DashSession::new(Uuid::new_v4());
        assert!(session.ensure_assignable().is_ok());
        assert_eq!(
            session.ensure_unassignable(),
            Err(ErrorCode::NoTaskAssigned)
        );

        session.task_id = Some(Uuid::new_v4());
        assert_eq!(
            session.ensure_assignable(),
            Err(ErrorCode::TaskAlreadyAssigned)
        );
        assert!(session.ensure_unassignable().is_ok());
    }

    #[test]
    fn ownership_guard() {
        let owner = Uuid::new_v4();
        let session = DashSession::new(owner);
        assert!(session.ensure_owned_by(owner).is_ok());
        assert_eq!(
            session.ensure_owned_by(Uuid::new_v4()),
            Err(ErrorCode::UnauthorizedSession)
        );
    }
}
