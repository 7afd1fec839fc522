use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An authenticated browser session, written to Redis by the login flow
/// (out of scope here) and resolved on the WebSocket upgrade.
///
/// The coordination engine only reads these records: the credential cookie
/// is the black box that yields a `user_id` for a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    /// The ID of the user this session belongs to.
    pub user_id: Uuid,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the session expires.
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
