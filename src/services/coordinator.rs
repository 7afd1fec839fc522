//! The session coordinator: interprets protocol commands against the
//! ephemeral store, enforces the lifecycle state machine, and fans resulting
//! facts out to every socket of the user.
//!
//! Per-user mutation is serialized by an async lock held across the store
//! operation and the enqueue of all outbound messages, so the order of
//! broadcasts observed by any socket matches commit order. Cross-user
//! commands share nothing and never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::error::{AppError, ErrorCode, Result};
use crate::models::event::SessionEvent;
use crate::models::session::SessionStatus;
use crate::models::task::TaskStatus;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::{SocketId, SocketRegistry};
use crate::repositories::dash::DashStore;
use crate::repositories::session::DurableStore;

/// Lifecycle-scoped coordination engine. Constructed once at service start
/// (or per test) and owns the socket registry for its lifetime.
pub struct Coordinator {
    store: Arc<dyn DashStore>,
    durable: Arc<dyn DurableStore>,
    registry: SocketRegistry,
    user_locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn DashStore>,
        durable: Arc<dyn DurableStore>,
        registry: SocketRegistry,
    ) -> Self {
        Self {
            store,
            durable,
            registry,
            user_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &SocketRegistry {
        &self.registry
    }

    fn user_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().expect("user lock map poisoned");
        locks.entry(user_id).or_default().clone()
    }

    /// Registers a socket and pushes the current ephemeral session (if any)
    /// so a newly joined device hydrates without replaying the protocol.
    pub async fn on_connect(
        &self,
        user_id: Uuid,
        tx: mpsc::Sender<ServerMessage>,
    ) -> SocketId {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let socket_id = self.registry.register(user_id, tx);
        let session = match self.store.get(user_id).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("⚠️ Hydration read failed for user {}: {}", user_id, e);
                None
            }
        };
        self.registry
            .send_to(user_id, socket_id, ServerMessage::ConnectionReady { session });

        tracing::info!(
            "🔌 Socket {} connected for user {} ({} total)",
            socket_id,
            user_id,
            self.registry.socket_count(user_id)
        );
        socket_id
    }

    /// Deregisters a socket. The ephemeral session is untouched: it persists
    /// independently of connectivity.
    pub fn on_disconnect(&self, user_id: Uuid, socket_id: SocketId) {
        self.registry.deregister(user_id, socket_id);
        tracing::info!(
            "🔌 Socket {} disconnected for user {} ({} remaining)",
            socket_id,
            user_id,
            self.registry.socket_count(user_id)
        );
    }

    /// Handles one inbound command. Guard violations and unexpected errors
    /// never corrupt the event log: they short-circuit before any mutation
    /// and surface as a typed `ERROR` frame to the originating socket only.
    pub async fn handle(&self, user_id: Uuid, socket_id: SocketId, message: ClientMessage) {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let result = match message {
            ClientMessage::Init => self.init(user_id, socket_id).await,
            ClientMessage::AssignTask { task_id } => {
                self.assign_task(user_id, socket_id, task_id).await
            }
            ClientMessage::UnassignTask => self.unassign_task(user_id, socket_id).await,
            ClientMessage::Event { event } => self.ingest_event(user_id, event).await,
            ClientMessage::Complete => self.complete(user_id).await,
            ClientMessage::Cancel => self.cancel(user_id).await,
        };

        if let Err(err) = result {
            let code = err.code();
            if code == ErrorCode::InternalError {
                tracing::error!("❌ Command failed for user {}: {}", user_id, err);
            } else {
                tracing::debug!("Command rejected for user {}: {}", user_id, err);
            }

            // Best-effort session id for correlation.
            let session_id = self
                .store
                .get(user_id)
                .await
                .ok()
                .flatten()
                .map(|s| s.session_id);
            self.registry
                .send_to(user_id, socket_id, ServerMessage::error(code, session_id));
        }
    }

    /// `INIT`: idempotent create-or-get, acknowledged to the requester only.
    async fn init(&self, user_id: Uuid, socket_id: SocketId) -> Result<()> {
        let session = self.store.create_or_get(user_id).await?;
        self.registry.send_to(
            user_id,
            socket_id,
            ServerMessage::InitAck {
                session_id: session.session_id,
            },
        );
        Ok(())
    }

    async fn assign_task(&self, user_id: Uuid, socket_id: SocketId, task_id: Uuid) -> Result<()> {
        let session = self
            .store
            .get(user_id)
            .await?
            .ok_or(AppError::Guard(ErrorCode::NoActiveSession))?;
        session.ensure_assignable().map_err(AppError::Guard)?;

        let task = self
            .durable
            .task_for_user(user_id, task_id)
            .await?
            .ok_or(AppError::Guard(ErrorCode::TaskNotFound))?;
        if task.status == TaskStatus::Complete {
            return Err(AppError::Guard(ErrorCode::TaskAlreadyComplete));
        }
        if self.durable.task_has_committed_session(task_id).await? {
            return Err(AppError::Guard(ErrorCode::TaskHasSession));
        }

        let updated = self
            .store
            .assign_task(user_id, task_id)
            .await?
            .ok_or(AppError::Guard(ErrorCode::NoActiveSession))?;

        // Direct ack to the requester, same fact to the other sockets; the
        // requester is excluded from the fan-out to avoid double delivery.
        let fact = ServerMessage::TaskAssigned {
            session_id: updated.session_id,
            task_id,
        };
        self.registry.send_to(user_id, socket_id, fact.clone());
        self.registry.broadcast_except(user_id, socket_id, fact);
        Ok(())
    }

    async fn unassign_task(&self, user_id: Uuid, socket_id: SocketId) -> Result<()> {
        let session = self
            .store
            .get(user_id)
            .await?
            .ok_or(AppError::Guard(ErrorCode::NoActiveSession))?;
        session.ensure_unassignable().map_err(AppError::Guard)?;

        let updated = self
            .store
            .unassign_task(user_id)
            .await?
            .ok_or(AppError::Guard(ErrorCode::NoActiveSession))?;

        let fact = ServerMessage::TaskUnassigned {
            session_id: updated.session_id,
        };
        self.registry.send_to(user_id, socket_id, fact.clone());
        self.registry.broadcast_except(user_id, socket_id, fact);
        Ok(())
    }

    /// `EVENT`: validate the state-machine guard, append, and broadcast to
    /// **all** sockets including the sender (which reconciles idempotently).
    async fn ingest_event(&self, user_id: Uuid, event: SessionEvent) -> Result<()> {
        let session = self
            .store
            .get(user_id)
            .await?
            .ok_or(AppError::Guard(ErrorCode::SessionNotFound))?;
        session.ensure_event_allowed(&event).map_err(AppError::Guard)?;

        let bootstrap = event.is_stopwatch_start() && session.status.is_initialized();
        if bootstrap {
            self.store
                .mark_status(user_id, SessionStatus::Active)
                .await?
                .ok_or(AppError::Guard(ErrorCode::SessionNotFound))?;
        }

        let updated = self
            .store
            .add_event(user_id, event.clone())
            .await?
            .ok_or(AppError::Guard(ErrorCode::SessionNotFound))?;

        // Only the very first start, and only with a task assigned, flips
        // the task's durable status.
        if bootstrap {
            if let Some(task_id) = updated.task_id {
                self.durable
                    .set_task_status(task_id, TaskStatus::InProgress)
                    .await?;
                tracing::info!("▶️ Task {} marked in progress", task_id);
            }
        }

        self.registry.broadcast(
            user_id,
            ServerMessage::EventBroadcast {
                session_id: updated.session_id,
                event,
            },
        );
        Ok(())
    }

    /// `COMPLETE`: mark completed, attempt the durable commit exactly once.
    /// On failure the ephemeral record is left in `completed` so the command
    /// is retryable; the typed error is broadcast with the session id.
    async fn complete(&self, user_id: Uuid) -> Result<()> {
        let session = self
            .store
            .get(user_id)
            .await?
            .ok_or(AppError::Guard(ErrorCode::NoActiveSession))?;
        session.ensure_owned_by(user_id).map_err(AppError::Guard)?;
        session.ensure_completable().map_err(AppError::Guard)?;

        let completed = self
            .store
            .mark_status(user_id, SessionStatus::Completed)
            .await?
            .ok_or(AppError::Guard(ErrorCode::NoActiveSession))?;

        match self.durable.persist_completed_session(&completed).await {
            Ok(outcome) => {
                tracing::debug!(
                    "Durable commit for session {}: {:?}",
                    completed.session_id,
                    outcome
                );
                self.store.delete(user_id).await?;
                self.registry.broadcast(
                    user_id,
                    ServerMessage::CompleteAck {
                        session_id: completed.session_id,
                    },
                );
            }
            Err(err) => {
                tracing::error!(
                    "❌ Durable commit failed for session {}: {} (record kept for retry)",
                    completed.session_id,
                    err
                );
                self.registry.broadcast(
                    user_id,
                    ServerMessage::error(ErrorCode::PersistFailed, Some(completed.session_id)),
                );
            }
        }
        Ok(())
    }

    /// `CANCEL`: tolerant delete. Resets the assigned task (if any) back to
    /// not-started; a cancel with no record is a no-op acknowledged the same
    /// way.
    async fn cancel(&self, user_id: Uuid) -> Result<()> {
        match self.store.get(user_id).await? {
            Some(session) => {
                session.ensure_owned_by(user_id).map_err(AppError::Guard)?;
                if let Some(task_id) = session.task_id {
                    self.durable
                        .set_task_status(task_id, TaskStatus::NotStarted)
                        .await?;
                    tracing::info!("↩️ Task {} reset to not started", task_id);
                }
                self.store.delete(user_id).await?;
                self.registry.broadcast(
                    user_id,
                    ServerMessage::CancelAck {
                        session_id: Some(session.session_id),
                    },
                );
            }
            None => {
                self.registry
                    .broadcast(user_id, ServerMessage::CancelAck { session_id: None });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use crate::models::event::StopwatchAction;
    use crate::models::session::DashSession;
    use crate::models::task::Task;
    use crate::repositories::session::{validate_for_persist, PersistOutcome};

    #[derive(Default)]
    struct MemoryDashStore {
        sessions: StdMutex<HashMap<Uuid, DashSession>>,
    }

    impl MemoryDashStore {
        fn update<F>(&self, user_id: Uuid, mutate: F) -> Result<Option<DashSession>>
        where
            F: FnOnce(&mut DashSession),
        {
            let mut sessions = self.sessions.lock().unwrap();
            let Some(session) = sessions.get_mut(&user_id) else {
                return Ok(None);
            };
            mutate(session);
            Ok(Some(session.clone()))
        }
    }

    #[async_trait]
    impl DashStore for MemoryDashStore {
        async fn create_or_get(&self, user_id: Uuid) -> Result<DashSession> {
            let mut sessions = self.sessions.lock().unwrap();
            Ok(sessions
                .entry(user_id)
                .or_insert_with(|| DashSession::new(user_id))
                .clone())
        }

        async fn get(&self, user_id: Uuid) -> Result<Option<DashSession>> {
            Ok(self.sessions.lock().unwrap().get(&user_id).cloned())
        }

        async fn add_event(
            &self,
            user_id: Uuid,
            event: SessionEvent,
        ) -> Result<Option<DashSession>> {
            self.update(user_id, |s| s.events.push(event))
        }

        async fn assign_task(
            &self,
            user_id: Uuid,
            task_id: Uuid,
        ) -> Result<Option<DashSession>> {
            self.update(user_id, |s| {
                s.task_id = Some(task_id);
                if s.status == SessionStatus::InitializedNoTask {
                    s.status = SessionStatus::InitializedWithTask;
                }
            })
        }

        async fn unassign_task(&self, user_id: Uuid) -> Result<Option<DashSession>> {
            self.update(user_id, |s| {
                s.task_id = None;
                if s.status == SessionStatus::InitializedWithTask {
                    s.status = SessionStatus::InitializedNoTask;
                }
            })
        }

        async fn mark_status(
            &self,
            user_id: Uuid,
            status: SessionStatus,
        ) -> Result<Option<DashSession>> {
            self.update(user_id, |s| s.status = status)
        }

        async fn delete(&self, user_id: Uuid) -> Result<bool> {
            Ok(self.sessions.lock().unwrap().remove(&user_id).is_some())
        }
    }

    #[derive(Default)]
    struct MemoryDurableStore {
        tasks: StdMutex<HashMap<Uuid, Task>>,
        committed_sessions: StdMutex<HashSet<Uuid>>,
        committed_tasks: StdMutex<HashSet<Uuid>>,
        fail_persist: AtomicBool,
    }

    impl MemoryDurableStore {
        fn insert_task(&self, user_id: Uuid, status: TaskStatus) -> Uuid {
            let id = Uuid::new_v4();
            self.tasks.lock().unwrap().insert(
                id,
                Task {
                    id,
                    user_id,
                    title: "write spec".into(),
                    status,
                },
            );
            id
        }

        fn task_status(&self, task_id: Uuid) -> TaskStatus {
            self.tasks.lock().unwrap().get(&task_id).unwrap().status
        }
    }

    #[async_trait]
    impl DurableStore for MemoryDurableStore {
        async fn persist_completed_session(
            &self,
            session: &DashSession,
        ) -> Result<PersistOutcome> {
            if self.fail_persist.load(Ordering::SeqCst) {
                return Err(AppError::Internal("storage unavailable".into()));
            }
            let totals = validate_for_persist(session)?;
            let mut committed = self.committed_sessions.lock().unwrap();
            if !committed.insert(session.session_id) {
                return Ok(PersistOutcome::AlreadyPersisted);
            }
            self.committed_tasks.lock().unwrap().insert(totals.task_id);
            Ok(PersistOutcome::Created)
        }

        async fn task_for_user(&self, user_id: Uuid, task_id: Uuid) -> Result<Option<Task>> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .get(&task_id)
                .filter(|t| t.user_id == user_id)
                .cloned())
        }

        async fn task_has_committed_session(&self, task_id: Uuid) -> Result<bool> {
            Ok(self.committed_tasks.lock().unwrap().contains(&task_id))
        }

        async fn set_task_status(&self, task_id: Uuid, status: TaskStatus) -> Result<()> {
            if let Some(task) = self.tasks.lock().unwrap().get_mut(&task_id) {
                task.status = status;
            }
            Ok(())
        }
    }

    struct Rig {
        coordinator: Coordinator,
        durable: Arc<MemoryDurableStore>,
        store: Arc<MemoryDashStore>,
    }

    fn rig() -> Rig {
        let store = Arc::new(MemoryDashStore::default());
        let durable = Arc::new(MemoryDurableStore::default());
        let coordinator = Coordinator::new(
            store.clone(),
            durable.clone(),
            SocketRegistry::new(),
        );
        Rig {
            coordinator,
            durable,
            store,
        }
    }

    async fn attach(
        rig: &Rig,
        user_id: Uuid,
    ) -> (SocketId, mpsc::Receiver<ServerMessage>) {
        let (tx, mut rx) = mpsc::channel(32);
        let socket_id = rig.coordinator.on_connect(user_id, tx).await;
        // Swallow the hydration frame; tests assert on what follows.
        let ready = rx.recv().await.unwrap();
        assert!(matches!(ready, ServerMessage::ConnectionReady { .. }));
        (socket_id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn start_event(ts: i64) -> ClientMessage {
        ClientMessage::Event {
            event: SessionEvent::stopwatch(StopwatchAction::Start, ts),
        }
    }

    #[tokio::test]
    async fn init_returns_one_session_across_sockets() {
        let rig = rig();
        let user = Uuid::new_v4();
        let (sock_a, mut rx_a) = attach(&rig, user).await;
        let (sock_b, mut rx_b) = attach(&rig, user).await;

        rig.coordinator.handle(user, sock_a, ClientMessage::Init).await;
        rig.coordinator.handle(user, sock_b, ClientMessage::Init).await;
        rig.coordinator.handle(user, sock_a, ClientMessage::Init).await;

        let ids_a: Vec<_> = drain(&mut rx_a)
            .into_iter()
            .map(|m| match m {
                ServerMessage::InitAck { session_id } => session_id,
                other => panic!("unexpected message: {:?}", other),
            })
            .collect();
        let ids_b: Vec<_> = drain(&mut rx_b)
            .into_iter()
            .map(|m| match m {
                ServerMessage::InitAck { session_id } => session_id,
                other => panic!("unexpected message: {:?}", other),
            })
            .collect();

        assert_eq!(ids_a.len(), 2);
        assert_eq!(ids_b.len(), 1);
        assert!(ids_a.iter().chain(&ids_b).all(|id| *id == ids_a[0]));
    }

    #[tokio::test]
    async fn assign_rejected_when_task_already_has_committed_session() {
        let rig = rig();
        let user = Uuid::new_v4();
        let (sock, mut rx) = attach(&rig, user).await;

        let task_id = rig.durable.insert_task(user, TaskStatus::NotStarted);
        rig.durable.committed_tasks.lock().unwrap().insert(task_id);

        rig.coordinator.handle(user, sock, ClientMessage::Init).await;
        rig.coordinator
            .handle(user, sock, ClientMessage::AssignTask { task_id })
            .await;

        let messages = drain(&mut rx);
        assert!(matches!(
            messages.last(),
            Some(ServerMessage::Error {
                code: ErrorCode::TaskHasSession,
                ..
            })
        ));

        // The rejected attempt left the session's task untouched.
        let session = rig.store.get(user).await.unwrap().unwrap();
        assert_eq!(session.task_id, None);
    }

    #[tokio::test]
    async fn assign_guards_name_specific_reasons() {
        let rig = rig();
        let user = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let (sock, mut rx) = attach(&rig, user).await;

        rig.coordinator.handle(user, sock, ClientMessage::Init).await;
        drain(&mut rx);

        // Someone else's task is indistinguishable from a missing one.
        let foreign = rig.durable.insert_task(stranger, TaskStatus::NotStarted);
        rig.coordinator
            .handle(user, sock, ClientMessage::AssignTask { task_id: foreign })
            .await;
        assert!(matches!(
            drain(&mut rx).last(),
            Some(ServerMessage::Error {
                code: ErrorCode::TaskNotFound,
                ..
            })
        ));

        let done = rig.durable.insert_task(user, TaskStatus::Complete);
        rig.coordinator
            .handle(user, sock, ClientMessage::AssignTask { task_id: done })
            .await;
        assert!(matches!(
            drain(&mut rx).last(),
            Some(ServerMessage::Error {
                code: ErrorCode::TaskAlreadyComplete,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn event_fanout_includes_sender_assign_does_not() {
        let rig = rig();
        let user = Uuid::new_v4();
        let (sock_a, mut rx_a) = attach(&rig, user).await;
        let (_sock_b, mut rx_b) = attach(&rig, user).await;

        let task_id = rig.durable.insert_task(user, TaskStatus::NotStarted);
        rig.coordinator.handle(user, sock_a, ClientMessage::Init).await;
        rig.coordinator
            .handle(user, sock_a, ClientMessage::AssignTask { task_id })
            .await;

        let a_msgs = drain(&mut rx_a);
        let b_msgs = drain(&mut rx_b);
        // Requester: InitAck + exactly one TaskAssigned (the direct ack).
        assert_eq!(
            a_msgs
                .iter()
                .filter(|m| matches!(m, ServerMessage::TaskAssigned { .. }))
                .count(),
            1
        );
        // Other socket: exactly one TaskAssigned via fan-out, no InitAck.
        assert_eq!(b_msgs.len(), 1);
        assert!(matches!(b_msgs[0], ServerMessage::TaskAssigned { .. }));

        rig.coordinator.handle(user, sock_a, start_event(0)).await;
        let a_msgs = drain(&mut rx_a);
        let b_msgs = drain(&mut rx_b);
        assert!(matches!(a_msgs.last(), Some(ServerMessage::EventBroadcast { .. })));
        assert!(matches!(b_msgs.last(), Some(ServerMessage::EventBroadcast { .. })));
    }

    #[tokio::test]
    async fn first_start_flips_task_in_progress_and_stray_start_is_rejected() {
        let rig = rig();
        let user = Uuid::new_v4();
        let (sock, mut rx) = attach(&rig, user).await;

        let task_id = rig.durable.insert_task(user, TaskStatus::NotStarted);
        rig.coordinator.handle(user, sock, ClientMessage::Init).await;
        rig.coordinator
            .handle(user, sock, ClientMessage::AssignTask { task_id })
            .await;
        rig.coordinator.handle(user, sock, start_event(0)).await;

        assert_eq!(rig.durable.task_status(task_id), TaskStatus::InProgress);
        let session = rig.store.get(user).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        drain(&mut rx);

        rig.coordinator.handle(user, sock, start_event(5_000)).await;
        assert!(matches!(
            drain(&mut rx).last(),
            Some(ServerMessage::Error {
                code: ErrorCode::SessionNotActive,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn complete_keeps_record_on_persist_failure_and_retries() {
        let rig = rig();
        let user = Uuid::new_v4();
        let (sock, mut rx) = attach(&rig, user).await;

        let task_id = rig.durable.insert_task(user, TaskStatus::NotStarted);
        rig.coordinator.handle(user, sock, ClientMessage::Init).await;
        rig.coordinator
            .handle(user, sock, ClientMessage::AssignTask { task_id })
            .await;
        rig.coordinator.handle(user, sock, start_event(0)).await;
        drain(&mut rx);

        rig.durable.fail_persist.store(true, Ordering::SeqCst);
        rig.coordinator.handle(user, sock, ClientMessage::Complete).await;

        let messages = drain(&mut rx);
        assert!(matches!(
            messages.last(),
            Some(ServerMessage::Error {
                code: ErrorCode::PersistFailed,
                session_id: Some(_),
                ..
            })
        ));
        let kept = rig.store.get(user).await.unwrap().unwrap();
        assert_eq!(kept.status, SessionStatus::Completed);

        // Retry succeeds once storage recovers; the record is then gone.
        rig.durable.fail_persist.store(false, Ordering::SeqCst);
        rig.coordinator.handle(user, sock, ClientMessage::Complete).await;
        assert!(matches!(
            drain(&mut rx).last(),
            Some(ServerMessage::CompleteAck { .. })
        ));
        assert!(rig.store.get(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn complete_without_task_is_rejected() {
        let rig = rig();
        let user = Uuid::new_v4();
        let (sock, mut rx) = attach(&rig, user).await;

        rig.coordinator.handle(user, sock, ClientMessage::Init).await;
        rig.coordinator.handle(user, sock, ClientMessage::Complete).await;

        assert!(matches!(
            drain(&mut rx).last(),
            Some(ServerMessage::Error {
                code: ErrorCode::NoTaskAssigned,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn cancel_resets_task_and_is_idempotent() {
        let rig = rig();
        let user = Uuid::new_v4();
        let (sock, mut rx) = attach(&rig, user).await;

        let task_id = rig.durable.insert_task(user, TaskStatus::NotStarted);
        rig.coordinator.handle(user, sock, ClientMessage::Init).await;
        rig.coordinator
            .handle(user, sock, ClientMessage::AssignTask { task_id })
            .await;
        rig.coordinator.handle(user, sock, start_event(0)).await;
        drain(&mut rx);
        assert_eq!(rig.durable.task_status(task_id), TaskStatus::InProgress);

        rig.coordinator.handle(user, sock, ClientMessage::Cancel).await;
        assert_eq!(rig.durable.task_status(task_id), TaskStatus::NotStarted);
        assert!(rig.store.get(user).await.unwrap().is_none());
        assert!(matches!(
            drain(&mut rx).last(),
            Some(ServerMessage::CancelAck {
                session_id: Some(_)
            })
        ));

        // Second cancel is a tolerated no-op, still acknowledged.
        rig.coordinator.handle(user, sock, ClientMessage::Cancel).await;
        assert!(matches!(
            drain(&mut rx).last(),
            Some(ServerMessage::CancelAck { session_id: None })
        ));
    }

    #[tokio::test]
    async fn event_after_cancel_is_rejected_not_resurrected() {
        let rig = rig();
        let user = Uuid::new_v4();
        let (sock, mut rx) = attach(&rig, user).await;

        rig.coordinator.handle(user, sock, ClientMessage::Init).await;
        rig.coordinator.handle(user, sock, ClientMessage::Cancel).await;
        drain(&mut rx);

        rig.coordinator.handle(user, sock, start_event(1_000)).await;
        assert!(matches!(
            drain(&mut rx).last(),
            Some(ServerMessage::Error {
                code: ErrorCode::SessionNotFound,
                ..
            })
        ));
        assert!(rig.store.get(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unassign_requires_an_assigned_task() {
        let rig = rig();
        let user = Uuid::new_v4();
        let (sock, mut rx) = attach(&rig, user).await;

        rig.coordinator.handle(user, sock, ClientMessage::Init).await;
        rig.coordinator.handle(user, sock, ClientMessage::UnassignTask).await;
        assert!(matches!(
            drain(&mut rx).last(),
            Some(ServerMessage::Error {
                code: ErrorCode::NoTaskAssigned,
                ..
            })
        ));

        let task_id = rig.durable.insert_task(user, TaskStatus::NotStarted);
        rig.coordinator
            .handle(user, sock, ClientMessage::AssignTask { task_id })
            .await;
        rig.coordinator.handle(user, sock, ClientMessage::UnassignTask).await;

        let session = rig.store.get(user).await.unwrap().unwrap();
        assert_eq!(session.task_id, None);
        assert_eq!(session.status, SessionStatus::InitializedNoTask);
        assert!(matches!(
            drain(&mut rx).last(),
            Some(ServerMessage::TaskUnassigned { .. })
        ));
    }

    #[tokio::test]
    async fn hydration_pushes_current_session_to_new_sockets() {
        let rig = rig();
        let user = Uuid::new_v4();
        let (sock, _rx) = attach(&rig, user).await;
        rig.coordinator.handle(user, sock, ClientMessage::Init).await;

        // A device joining later receives the live session in its ready frame.
        let (tx, mut rx) = mpsc::channel(8);
        rig.coordinator.on_connect(user, tx).await;
        match rx.recv().await.unwrap() {
            ServerMessage::ConnectionReady { session: Some(s) } => {
                assert_eq!(s.user_id, user);
            }
            other => panic!("expected hydration with session, got {:?}", other),
        }
    }
}
