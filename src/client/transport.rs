//! The resilient transport abstraction.
//!
//! Both physical transports (direct WebSocket, relay through a privileged
//! intermediary process) expose the same capability interface and share one
//! supervision engine: dial, pump frames, and on connection loss walk the
//! reconnect schedule until it succeeds or the policy is exhausted.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::backoff::ReconnectPolicy;
use crate::protocol::{ClientMessage, ServerMessage};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Frame encoding/decoding failed: {0}")]
    Codec(String),
}

/// Facts a transport surfaces to its owner. The Rust rendering of the
/// `onOpen/onMessage/onClose/onError` callbacks: delivered in order on the
/// event channel handed to the transport at construction.
#[derive(Debug)]
pub enum TransportEvent {
    /// The channel is up (initial connect or a successful reconnect).
    Open,
    /// A protocol frame arrived from the coordinator.
    Message(ServerMessage),
    /// The channel dropped; the transport will retry per its policy.
    Closed { reason: Option<String> },
    /// A non-fatal error (e.g. one failed reconnect attempt).
    Error(String),
    /// The reconnect policy is exhausted; only `reconnect()` resumes.
    GaveUp,
}

/// The capability interface both transport variants implement.
#[async_trait]
pub trait Transport: Send {
    /// Dials once; on success a background supervisor keeps the channel
    /// alive across drops. An initial dial failure is returned to the
    /// caller and does not start background retries.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Tears the channel down and stops any reconnection.
    async fn disconnect(&mut self);

    /// Queues a command for the coordinator.
    async fn send(&mut self, message: ClientMessage) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Explicit manual resume after `GaveUp` (or a failed `connect`).
    async fn reconnect(&mut self) -> Result<(), TransportError>;
}

pub type BoxedSink = Pin<Box<dyn Sink<ClientMessage, Error = TransportError> + Send>>;
pub type BoxedStream =
    Pin<Box<dyn Stream<Item = Result<ServerMessage, TransportError>> + Send>>;

/// How a concrete transport establishes one reliable, ordered,
/// message-oriented duplex channel.
#[async_trait]
pub trait Dial: Send + Sync {
    async fn dial(&self) -> Result<(BoxedSink, BoxedStream), TransportError>;
}

/// Shared engine behind both transports: owns the outbound queue, the
/// connected flag, and the supervisor task running the io/reconnect loop.
pub(crate) struct ResilientCore {
    dial: Arc<dyn Dial>,
    policy: ReconnectPolicy,
    event_tx: mpsc::Sender<TransportEvent>,
    outbound_tx: Option<mpsc::Sender<ClientMessage>>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    supervisor: Option<JoinHandle<()>>,
}

impl ResilientCore {
    pub(crate) fn new(
        dial: Arc<dyn Dial>,
        policy: ReconnectPolicy,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        Self {
            dial,
            policy,
            event_tx,
            outbound_tx: None,
            connected: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            supervisor: None,
        }
    }

    pub(crate) async fn connect(&mut self) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }
        self.teardown();

        let link = self.dial.dial().await?;

        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        self.outbound_tx = Some(outbound_tx);
        self.connected = Arc::new(AtomicBool::new(true));
        self.shutdown = Arc::new(AtomicBool::new(false));

        let _ = self.event_tx.send(TransportEvent::Open).await;

        self.supervisor = Some(tokio::spawn(supervise(
            self.dial.clone(),
            self.policy.clone(),
            link,
            outbound_rx,
            self.event_tx.clone(),
            self.connected.clone(),
            self.shutdown.clone(),
        )));
        Ok(())
    }

    pub(crate) async fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let tx = self.outbound_tx.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(message)
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) async fn disconnect(&mut self) {
        self.teardown();
    }

    pub(crate) async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.connect().await
    }

    fn teardown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the queue ends the io loop; the supervisor then observes
        // the shutdown flag and exits instead of reconnecting.
        self.outbound_tx = None;
        self.supervisor = None;
    }
}

async fn supervise(
    dial: Arc<dyn Dial>,
    policy: ReconnectPolicy,
    link: (BoxedSink, BoxedStream),
    mut outbound_rx: mpsc::Receiver<ClientMessage>,
    event_tx: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) {
    let mut link = Some(link);
    loop {
        if let Some((sink, stream)) = link.take() {
            let reason = run_io(sink, stream, &mut outbound_rx, &event_tx).await;
            connected.store(false, Ordering::SeqCst);
            let _ = event_tx.send(TransportEvent::Closed { reason }).await;
        }

        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        // Walk the backoff schedule until a dial succeeds or the policy
        // gives out.
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let Some(delay) = policy.delay(attempt) else {
                let _ = event_tx.send(TransportEvent::GaveUp).await;
                return;
            };
            tokio::time::sleep(delay).await;
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            match dial.dial().await {
                Ok(pair) => {
                    connected.store(true, Ordering::SeqCst);
                    let _ = event_tx.send(TransportEvent::Open).await;
                    link = Some(pair);
                    break;
                }
                Err(e) => {
                    let _ = event_tx
                        .send(TransportEvent::Error(format!(
                            "reconnect attempt {} failed: {}",
                            attempt, e
                        )))
                        .await;
                }
            }
        }
    }
}

/// Pumps frames in both directions until the channel drops. Returns the
/// close reason, if one is known.
async fn run_io(
    mut sink: BoxedSink,
    mut stream: BoxedStream,
    outbound_rx: &mut mpsc::Receiver<ClientMessage>,
    event_tx: &mpsc::Sender<TransportEvent>,
) -> Option<String> {
    loop {
        tokio::select! {
            inbound = stream.next() => match inbound {
                Some(Ok(message)) => {
                    if event_tx.send(TransportEvent::Message(message)).await.is_err() {
                        return Some("event consumer dropped".to_string());
                    }
                }
                Some(Err(e)) => return Some(e.to_string()),
                None => return None,
            },
            command = outbound_rx.recv() => match command {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        return Some(e.to_string());
                    }
                }
                // The transport handle dropped the queue (disconnect).
                None => return Some("transport closed locally".to_string()),
            },
        }
    }
}
