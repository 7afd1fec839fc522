//! The coordination WebSocket endpoint.
//!
//! One connection = one registered socket for the authenticated user. The
//! connection owns an outbound channel drained by a writer task; the read
//! loop feeds inbound frames to the coordinator. A socket whose writer
//! fails is simply deregistered; other sockets of the user are unaffected.

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::ErrorCode;
use crate::models::auth::AuthSession;
use crate::protocol::{ClientMessage, ServerMessage, POLICY_CLOSE_CODE};
use crate::state::AppState;

/// Frames that can go out on this connection.
enum Outbound {
    /// JSON-serialized protocol message.
    Proto(ServerMessage),
    /// Raw pong response.
    Pong(Bytes),
}

/// WebSocket upgrade handler. Authentication already happened in the
/// middleware; the `AuthSession` extension carries the resolved `user_id`.
pub async fn dash_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(auth): Extension<AuthSession>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, auth))
}

async fn handle_socket(socket: WebSocket, state: AppState, auth: AuthSession) {
    let user_id = auth.user_id;
    let (mut ws_tx, mut ws_rx) = socket.split();

    // The auth check in the middleware and the upgrade completing are not
    // atomic; re-check so an expired credential cannot slip through the gap.
    if auth.is_expired(chrono::Utc::now()) {
        let closed = ServerMessage::ConnectionClosed {
            reason: Some("auth session expired".to_string()),
            code: Some(POLICY_CLOSE_CODE),
        };
        if let Ok(json) = sonic_rs::to_string(&closed) {
            let _ = ws_tx.send(Message::Text(json.into())).await;
        }
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: POLICY_CLOSE_CODE,
                reason: "auth session expired".into(),
            })))
            .await;
        return;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(64);

    // Writer task: everything leaving this connection funnels through here.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let result = match frame {
                Outbound::Proto(message) => match sonic_rs::to_string(&message) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        tracing::error!("❌ Failed to serialize outbound frame: {}", e);
                        continue;
                    }
                },
                Outbound::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            };

            if result.is_err() {
                tracing::debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    // The registry speaks ServerMessage; bridge it into the outbound funnel.
    let proto_tx = wrap_sender(outbound_tx.clone());
    let socket_id = state.coordinator.on_connect(user_id, proto_tx).await;

    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = outbound_tx.send(Outbound::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                tracing::debug!("Client sent close frame");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
        };

        let message: ClientMessage = match sonic_rs::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Failed to parse client frame: {}", e);
                let _ = outbound_tx
                    .send(Outbound::Proto(ServerMessage::error(
                        ErrorCode::ParseError,
                        None,
                    )))
                    .await;
                continue;
            }
        };

        state.coordinator.handle(user_id, socket_id, message).await;
    }

    state.coordinator.on_disconnect(user_id, socket_id);
    send_task.abort();
}

/// Bridges a `ServerMessage` sender onto the connection's outbound channel.
fn wrap_sender(tx: mpsc::Sender<Outbound>) -> mpsc::Sender<ServerMessage> {
    let (proto_tx, mut proto_rx) = mpsc::channel::<ServerMessage>(64);
    tokio::spawn(async move {
        while let Some(message) = proto_rx.recv().await {
            if tx.send(Outbound::Proto(message)).await.is_err() {
                break;
            }
        }
    });
    proto_tx
}
