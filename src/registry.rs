//! The `user_id -> sockets` registry.
//!
//! Owned exclusively by the coordinator instance it is injected into, never
//! a module-level singleton, so tests can stand up isolated coordinators.
//! A socket belongs to exactly one user for its lifetime; a user may have
//! many sockets (multi-device).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ServerMessage;

/// Identifies one registered socket within a registry.
pub type SocketId = u64;

type UserSockets = HashMap<SocketId, mpsc::Sender<ServerMessage>>;

/// Registry of live sockets per user.
///
/// All sends are non-blocking `try_send`s into each connection's outbound
/// channel: a socket whose channel is closed or full is treated as
/// unreachable and dropped from the registry, and no error is raised to the
/// other sockets.
#[derive(Clone, Default)]
pub struct SocketRegistry {
    inner: Arc<RwLock<HashMap<Uuid, UserSockets>>>,
    next_id: Arc<AtomicU64>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a socket for `user_id` and returns its id.
    pub fn register(&self, user_id: Uuid, tx: mpsc::Sender<ServerMessage>) -> SocketId {
        let socket_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.entry(user_id).or_default().insert(socket_id, tx);
        socket_id
    }

    /// Removes a socket; drops the user's entry entirely once empty.
    pub fn deregister(&self, user_id: Uuid, socket_id: SocketId) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if let Some(sockets) = inner.get_mut(&user_id) {
            sockets.remove(&socket_id);
            if sockets.is_empty() {
                inner.remove(&user_id);
            }
        }
    }

    /// Number of live sockets for a user.
    pub fn socket_count(&self, user_id: Uuid) -> usize {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.get(&user_id).map(|s| s.len()).unwrap_or(0)
    }

    /// Sends to one specific socket of a user.
    pub fn send_to(&self, user_id: Uuid, socket_id: SocketId, message: ServerMessage) {
        let dead = {
            let inner = self.inner.read().expect("registry lock poisoned");
            match inner.get(&user_id).and_then(|s| s.get(&socket_id)) {
                Some(tx) => tx.try_send(message).is_err(),
                None => false,
            }
        };
        if dead {
            tracing::debug!("Socket {} unreachable, deregistering", socket_id);
            self.deregister(user_id, socket_id);
        }
    }

    /// Fans a message out to every socket of a user.
    pub fn broadcast(&self, user_id: Uuid, message: ServerMessage) {
        self.broadcast_filtered(user_id, None, message);
    }

    /// Fans a message out to every socket of a user except one (used for
    /// assign/unassign, where the requester already got the direct ack).
    pub fn broadcast_except(&self, user_id: Uuid, except: SocketId, message: ServerMessage) {
        self.broadcast_filtered(user_id, Some(except), message);
    }

    fn broadcast_filtered(
        &self,
        user_id: Uuid,
        except: Option<SocketId>,
        message: ServerMessage,
    ) {
        let mut dead = Vec::new();
        {
            let inner = self.inner.read().expect("registry lock poisoned");
            let Some(sockets) = inner.get(&user_id) else {
                return;
            };
            for (socket_id, tx) in sockets {
                if Some(*socket_id) == except {
                    continue;
                }
                if tx.try_send(message.clone()).is_err() {
                    dead.push(*socket_id);
                }
            }
        }
        for socket_id in dead {
            tracing::debug!("Socket {} unreachable during fan-out, deregistering", socket_id);
            self.deregister(user_id, socket_id);
        }
    }
}
