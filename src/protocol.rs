//! The wire protocol of the coordination engine.
//!
//! Both directions share one JSON envelope with a `type` discriminant.
//! The enums are closed: adding a command is a compile-checked addition to
//! the exhaustive matches in the coordinator and the client model, not a
//! runtime default-case fallthrough.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::models::event::SessionEvent;
use crate::models::session::DashSession;

/// Close code used when a connection is refused or terminated by policy
/// (e.g. the auth session expired).
pub const POLICY_CLOSE_CODE: u16 = 4401;

/// Commands a client may issue, always scoped to the connection's
/// authenticated user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Init,
    AssignTask { task_id: Uuid },
    UnassignTask,
    Event { event: SessionEvent },
    Complete,
    Cancel,
}

/// Facts the coordinator pushes back to sockets: direct acknowledgements,
/// fan-out broadcasts, and typed errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Sent once after a socket registers, so a newly joined device can
    /// hydrate without replaying the protocol. `session` is absent when the
    /// user has no live session.
    ConnectionReady { session: Option<DashSession> },
    InitAck { session_id: Uuid },
    TaskAssigned { session_id: Uuid, task_id: Uuid },
    TaskUnassigned { session_id: Uuid },
    EventBroadcast { session_id: Uuid, event: SessionEvent },
    CompleteAck { session_id: Uuid },
    /// `session_id` is absent when a tolerated no-op cancel found no record.
    CancelAck { session_id: Option<Uuid> },
    Error {
        session_id: Option<Uuid>,
        error: String,
        code: ErrorCode,
    },
    ConnectionClosed {
        reason: Option<String>,
        code: Option<u16>,
    },
}

impl ServerMessage {
    /// A typed error frame with the code's canonical message.
    pub fn error(code: ErrorCode, session_id: Option<Uuid>) -> Self {
        ServerMessage::Error {
            session_id,
            error: code.message().to_string(),
            code,
        }
    }
}
