//! Client-local mirror of the user's session.
//!
//! The mirror is optimistic for the client's own commands (the caller
//! appends locally before the round trip) and reconciled from broadcasts:
//! every frame from the coordinator is authoritative, so applying it
//! exhaustively keeps all of a user's devices converged on the same state.

use uuid::Uuid;

use crate::client::transport::TransportEvent;
use crate::error::ErrorCode;
use crate::models::event::SessionEvent;
use crate::models::session::{DashSession, SessionStatus};
use crate::models::timers::{reconstruct, TimerReport};
use crate::protocol::ServerMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The transport exhausted its reconnect policy; only an explicit
    /// manual reconnect leaves this state.
    GaveUp,
}

/// The mirrored shape of the server-side ephemeral record.
#[derive(Debug, Clone, PartialEq)]
pub struct MirroredSession {
    pub session_id: Uuid,
    pub task_id: Option<Uuid>,
    pub status: SessionStatus,
    pub events: Vec<SessionEvent>,
}

impl From<DashSession> for MirroredSession {
    fn from(session: DashSession) -> Self {
        MirroredSession {
            session_id: session.session_id,
            task_id: session.task_id,
            status: session.status,
            events: session.events,
        }
    }
}

/// Local projection of the user's session, fed by transport events.
#[derive(Debug, Default)]
pub struct ClientSessionModel {
    connection: ConnectionState,
    session: Option<MirroredSession>,
    last_error: Option<(ErrorCode, String)>,
}

impl ClientSessionModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn session(&self) -> Option<&MirroredSession> {
        self.session.as_ref()
    }

    pub fn last_error(&self) -> Option<&(ErrorCode, String)> {
        self.last_error.as_ref()
    }

    /// Timer state derived on demand from the mirrored log. Never stored:
    /// recomputing from events is what keeps devices agreeing.
    pub fn timers_at(&self, now_ms: i64) -> TimerReport {
        match &self.session {
            Some(session) => reconstruct(&session.events, now_ms),
            None => TimerReport::default(),
        }
    }

    /// Record that a connect attempt is underway.
    pub fn connecting(&mut self) {
        self.connection = ConnectionState::Connecting;
    }

    pub fn apply(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                self.connection = ConnectionState::Connected;
            }
            TransportEvent::Message(message) => self.apply_server(message),
            TransportEvent::Closed { .. } => {
                self.connection = ConnectionState::Disconnected;
            }
            TransportEvent::Error(_) => {}
            TransportEvent::GaveUp => {
                self.connection = ConnectionState::GaveUp;
            }
        }
    }

    fn apply_server(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::ConnectionReady { session } => {
                // Hydration replaces whatever the mirror held before the
                // (re)connect; the server copy is authoritative.
                self.session = session.map(MirroredSession::from);
            }
            ServerMessage::InitAck { session_id } => {
                let already_live = self
                    .session
                    .as_ref()
                    .is_some_and(|s| s.session_id == session_id);
                if !already_live {
                    self.session = Some(MirroredSession {
                        session_id,
                        task_id: None,
                        status: SessionStatus::InitializedNoTask,
                        events: Vec::new(),
                    });
                }
            }
            ServerMessage::TaskAssigned {
                session_id,
                task_id,
            } => {
                if let Some(session) = self.session_mut(session_id) {
                    session.task_id = Some(task_id);
                    if session.status == SessionStatus::InitializedNoTask {
                        session.status = SessionStatus::InitializedWithTask;
                    }
                }
            }
            ServerMessage::TaskUnassigned { session_id } => {
                if let Some(session) = self.session_mut(session_id) {
                    session.task_id = None;
                    if session.status == SessionStatus::InitializedWithTask {
                        session.status = SessionStatus::InitializedNoTask;
                    }
                }
            }
            ServerMessage::EventBroadcast { session_id, event } => {
                if let Some(session) = self.session_mut(session_id) {
                    // The device that issued the command already appended
                    // optimistically; its own broadcast echo is a duplicate.
                    if session.events.last() != Some(&event) {
                        session.events.push(event.clone());
                    }
                    if event.is_stopwatch_start() && session.status.is_initialized() {
                        session.status = SessionStatus::Active;
                    }
                }
            }
            ServerMessage::CompleteAck { session_id } => {
                // The server already deleted its ephemeral record.
                if self.session_mut(session_id).is_some() {
                    self.session = None;
                }
            }
            ServerMessage::CancelAck { .. } => {
                self.session = None;
            }
            ServerMessage::Error {
                error,
                code,
                ..
            } => {
                self.last_error = Some((code, error));
            }
            ServerMessage::ConnectionClosed { .. } => {
                self.connection = ConnectionState::Disconnected;
            }
        }
    }

    /// Appends an event the local device just sent, ahead of the broadcast
    /// echo. Kept identical to the echo so the dedup check matches.
    pub fn append_local(&mut self, event: SessionEvent) {
        if let Some(session) = self.session.as_mut() {
            if event.is_stopwatch_start() && session.status.is_initialized() {
                session.status = SessionStatus::Active;
            }
            session.events.push(event);
        }
    }

    fn session_mut(&mut self, session_id: Uuid) -> Option<&mut MirroredSession> {
        self.session
            .as_mut()
            .filter(|s| s.session_id == session_id)
    }
}
