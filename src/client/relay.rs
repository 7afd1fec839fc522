//! Relayed transport: instead of opening a network connection itself, the
//! client hands frames to a local privileged process over a Unix domain
//! socket and that process owns the real WebSocket. Frames are
//! newline-delimited JSON; the relay forwards them verbatim, so the
//! protocol on this leg is identical to the wire protocol.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};

use crate::client::backoff::ReconnectPolicy;
use crate::client::transport::{
    BoxedSink, BoxedStream, Dial, ResilientCore, Transport, TransportError, TransportEvent,
};
use crate::protocol::ClientMessage;

/// Dials the relay's Unix domain socket.
pub struct RelayDial {
    socket_path: PathBuf,
}

impl RelayDial {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }
}

#[async_trait]
impl Dial for RelayDial {
    async fn dial(&self) -> Result<(BoxedSink, BoxedStream), TransportError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!("🔌 Relay socket connected: {}", self.socket_path.display());

        let (frame_sink, frame_stream) = Framed::new(stream, LinesCodec::new()).split();

        let sink: BoxedSink = Box::pin(
            frame_sink
                .sink_map_err(|e| TransportError::Codec(e.to_string()))
                .with(|message: ClientMessage| async move {
                    sonic_rs::to_string(&message)
                        .map_err(|e| TransportError::Codec(e.to_string()))
                }),
        );

        let stream: BoxedStream = Box::pin(frame_stream.map(|line| {
            let line = line.map_err(|e| TransportError::Codec(e.to_string()))?;
            sonic_rs::from_str(&line).map_err(|e| TransportError::Codec(e.to_string()))
        }));

        Ok((sink, stream))
    }
}

/// Transport that speaks to the coordinator through the local relay.
pub struct RelayTransport {
    core: ResilientCore,
}

impl RelayTransport {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        policy: ReconnectPolicy,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        let dial = Arc::new(RelayDial::new(socket_path));
        Self {
            core: ResilientCore::new(dial, policy, event_tx),
        }
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.core.connect().await
    }

    async fn disconnect(&mut self) {
        self.core.disconnect().await;
    }

    async fn send(&mut self, message: ClientMessage) -> Result<(), TransportError> {
        self.core.send(message).await
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    async fn reconnect(&mut self) -> Result<(), TransportError> {
        self.core.reconnect().await
    }
}
