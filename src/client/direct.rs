//! Direct WebSocket transport: dials the coordination endpoint itself,
//! carrying the auth credential as a cookie on the upgrade request.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::Message;

use crate::client::backoff::ReconnectPolicy;
use crate::client::transport::{
    BoxedSink, BoxedStream, Dial, ResilientCore, Transport, TransportError, TransportEvent,
};
use crate::protocol::ClientMessage;

/// Dials the coordination endpoint over a plain WebSocket.
pub struct WsDial {
    url: String,
    session_cookie: String,
}

impl WsDial {
    pub fn new(url: impl Into<String>, session_cookie: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            session_cookie: session_cookie.into(),
        }
    }
}

#[async_trait]
impl Dial for WsDial {
    async fn dial(&self) -> Result<(BoxedSink, BoxedStream), TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        request.headers_mut().insert(
            COOKIE,
            format!("session_id={}", self.session_cookie)
                .parse()
                .map_err(|_| TransportError::Connect("invalid session cookie".to_string()))?,
        );

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!("🔌 WebSocket connected: {}", self.url);

        let (ws_sink, ws_stream) = ws.split();

        let sink: BoxedSink = Box::pin(
            ws_sink
                .sink_map_err(|e| TransportError::Codec(e.to_string()))
                .with(|message: ClientMessage| async move {
                    let json = sonic_rs::to_string(&message)
                        .map_err(|e| TransportError::Codec(e.to_string()))?;
                    Ok(Message::Text(json.into()))
                }),
        );

        let stream: BoxedStream = Box::pin(ws_stream.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => Some(
                    sonic_rs::from_str(&text).map_err(|e| TransportError::Codec(e.to_string())),
                ),
                Ok(Message::Close(_)) => None,
                // Pings are answered by the library; ignore the rest.
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Codec(e.to_string()))),
            }
        }));

        Ok((sink, stream))
    }
}

/// Transport that owns the WebSocket connection directly.
pub struct DirectTransport {
    core: ResilientCore,
}

impl DirectTransport {
    pub fn new(
        url: impl Into<String>,
        session_cookie: impl Into<String>,
        policy: ReconnectPolicy,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        let dial = Arc::new(WsDial::new(url, session_cookie));
        Self {
            core: ResilientCore::new(dial, policy, event_tx),
        }
    }
}

#[async_trait]
impl Transport for DirectTransport {
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
