//! Subscriber connection lifecycle
//!
//! Each WebSocket upgrade registers a [`Subscription`], forwards its queued frames to
//! the socket, and drops the subscription when the socket closes, errors, or the relay
//! shuts down. Nothing here looks at record contents.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde::Serialize;

use crate::app_state::AppState;
use crate::broadcast_channel::{encode_frame, ConnectionId, Frame, Subscription, CONNECTED_EVENT};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectedGreeting {
    connection_id: ConnectionId,
}

/// Why a subscriber connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientClosed,
    SocketError,
    SendFailed,
    Unregistered,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientClosed => "client_closed",
            DisconnectReason::SocketError => "socket_error",
            DisconnectReason::SendFailed => "send_failed",
            DisconnectReason::Unregistered => "unregistered",
            DisconnectReason::Shutdown => "shutdown",
        }
    }
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut subscription = match state.relay.channel().register() {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::error!(error = %e, "could not register subscriber");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let connection_id = subscription.id();
    tracing::info!(connection_id = %connection_id, "client connected");

    let reason = forward_frames(&mut socket, &mut subscription, &state).await;

    drop(subscription);
    if reason == DisconnectReason::Shutdown {
        let _ = socket.send(Message::Close(None)).await;
    }
    tracing::info!(connection_id = %connection_id, reason = reason.as_str(), "client disconnected");
}

async fn forward_frames(
    socket: &mut WebSocket,
    subscription: &mut Subscription,
    state: &AppState,
) -> DisconnectReason {
    let mut shutdown = state.shutdown_signal();
    if state.is_shutting_down() {
        return DisconnectReason::Shutdown;
    }

    match encode_frame(
        CONNECTED_EVENT,
        &ConnectedGreeting {
            connection_id: subscription.id(),
        },
    ) {
        Ok(greeting) => {
            if send_text(socket, &greeting).await.is_err() {
                return DisconnectReason::SendFailed;
            }
        }
        Err(e) => tracing::warn!(error = %e, "could not encode greeting"),
    }

    loop {
        tokio::select! {
            _ = shutdown.recv() => return DisconnectReason::Shutdown,
            frame = subscription.recv() => match frame {
                Some(frame) => {
                    if send_text(socket, &frame).await.is_err() {
                        return DisconnectReason::SendFailed;
                    }
                }
                None => return DisconnectReason::Unregistered,
            },
            incoming = socket.recv() => match incoming {
                None | Some(Ok(Message::Close(_))) => return DisconnectReason::ClientClosed,
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %subscription.id(), error = %e, "socket error");
                    return DisconnectReason::SocketError;
                }
                // Subscribers are read-only; pings are answered by axum.
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send_text(socket: &mut WebSocket, frame: &Frame) -> Result<(), axum::Error> {
    socket.send(Message::Text(frame.to_string().into())).await
}
