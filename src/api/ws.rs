//! WebSocket connection lifecycle: recv loop and event dispatch.

use super::AppState;
use crate::protocol::{
    ActionResult, ClientEvent, ServerEvent, OUTBOUND_QUEUE_CAPACITY,
};
use crate::session::SessionHandle;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_QUEUE_CAPACITY);
    state
        .registry
        .insert(&session_id, Arc::new(SessionHandle::new(outbound_tx)));
    state.chat.open(&session_id);
    tracing::info!(session_id = %session_id, "Client connected");

    let (mut sink, mut stream) = socket.split();

    // Writer: drain the session's outbound queue into the socket. It exits
    // when the registry drops the session's sender.
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to serialize event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(received) = stream.next().await {
        let msg = match received {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "Read error");
                break;
            }
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Message::Close(_) => break,
            _ => continue,
        };
        dispatch(&text, &session_id, &state).await;
    }

    // Connection loss destroys the session and its conversation; the global
    // task keeps running.
    state.registry.remove(&session_id);
    state.chat.close(&session_id);
    let _ = writer.await;
    tracing::info!(session_id = %session_id, "Client disconnected");
}

async fn dispatch(text: &str, session_id: &str, state: &AppState) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(err) => {
            state.registry.emit(
                session_id,
                ServerEvent::Error {
                    message: "invalid payload".to_string(),
                    details: Some(err.to_string()),
                },
            );
            return;
        }
    };

    match event {
        ClientEvent::ExtensionConnect => {
            let status = state.tasks.status().await;
            state
                .registry
                .emit(session_id, ServerEvent::Status(status));
            // Replay recent history, then subscribe to live events.
            state.bus.attach(session_id);
        }
        ClientEvent::GetStatus => {
            let status = state.tasks.status().await;
            state
                .registry
                .emit(session_id, ServerEvent::Status(status));
        }
        ClientEvent::StartTask(payload) | ClientEvent::StartClarifiedTask(payload) => {
            // Acceptance is announced by the broadcast `task_started`;
            // only rejections are acked directly.
            if let Err(error) = state.tasks.start(payload).await {
                state.registry.emit(
                    session_id,
                    ServerEvent::TaskActionResult(ActionResult::err(error)),
                );
            }
        }
        ClientEvent::StopTask => {
            ack(state, session_id, state.tasks.stop().await);
        }
        ClientEvent::PauseTask => {
            ack(state, session_id, state.tasks.pause().await);
        }
        ClientEvent::ResumeTask => {
            ack(state, session_id, state.tasks.resume().await);
        }
        ClientEvent::ChatMessage { message } => {
            if !state.chat.message(session_id, message).await {
                state.registry.emit(
                    session_id,
                    ServerEvent::Error {
                        message: "conversation unavailable".to_string(),
                        details: None,
                    },
                );
            }
        }
        ClientEvent::ResetConversation => {
            state.chat.reset(session_id).await;
        }
        ClientEvent::UserHelpResponse { response } => {
            match state.tasks.help_response(response).await {
                Ok(()) => {
                    state.registry.emit(
                        session_id,
                        ServerEvent::HelpResponseReceived {
                            message: "Help response received. Resuming the task.".to_string(),
                        },
                    );
                }
                Err(message) => {
                    state.registry.emit(
                        session_id,
                        ServerEvent::Error {
                            message,
                            details: None,
                        },
                    );
                }
            }
        }
    }
}

fn ack(state: &AppState, session_id: &str, result: Result<String, String>) {
    let action_result = match result {
        Ok(message) => ActionResult::ok(message),
        Err(error) => ActionResult::err(error),
    };
    state
        .registry
        .emit(session_id, ServerEvent::TaskActionResult(action_result));
}
