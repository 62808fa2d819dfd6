//! WebSocket connection handler

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use super::state::{AppState, Heartbeat};
use crate::types::{ClientEvent, ServerEvent, SessionId};

/// How long a heartbeat close waits for its Close frame to go out
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.instance.is_closing() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session = SessionId::new();
    let Some(connection) = state.instance.accept(session).await else {
        return; // Instance is shutting down
    };

    let (sink, mut stream) = socket.split();
    let (control_tx, control_rx) = mpsc::unbounded_channel::<Message>();
    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();

    let mut writer = tokio::spawn(writer_task(sink, connection.outbound, control_rx));
    let mut heartbeat = tokio::spawn(heartbeat_task(control_tx.clone(), pong_rx, state.heartbeat));

    let mut timed_out = false;
    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(msg)) => {
                        if !handle_client_message(msg, session, &state, &control_tx, &pong_tx).await {
                            break; // Client requested close
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(session = %session, error = %e, "WebSocket receive error");
                        break;
                    }
                    None => break, // Client disconnected
                }
            }
            _ = &mut writer => break, // Socket broken or instance dropped us
            _ = &mut heartbeat => {
                timed_out = true;
                break;
            }
        }
    }

    if timed_out {
        // Let the writer flush the Close frame queued by the heartbeat
        let _ = timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await;
    }
    writer.abort();
    heartbeat.abort();

    // No-op if shutdown already took this connection off the count
    state.instance.close(session).await;
}

/// Handle a message from the client
/// Returns false if the connection should be closed
async fn handle_client_message(
    msg: Message,
    session: SessionId,
    state: &AppState,
    control: &mpsc::UnboundedSender<Message>,
    pongs: &mpsc::UnboundedSender<()>,
) -> bool {
    match msg {
        Message::Text(text) => {
            match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if let Some(reply) = state.instance.receive(session, event).await {
                        if let Ok(json) = serde_json::to_string(&reply) {
                            let _ = control.send(Message::Text(json));
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(session = %session, error = %e, "Ignoring malformed client payload");
                }
            }
            true
        }
        Message::Binary(_) => true, // Ignore binary messages
        Message::Ping(data) => {
            let _ = control.send(Message::Pong(data));
            true
        }
        Message::Pong(_) => {
            let _ = pongs.send(());
            true
        }
        Message::Close(_) => false,
    }
}

/// Forward queued events and control frames to the socket
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerEvent>,
    mut control: mpsc::UnboundedReceiver<Message>,
) {
    loop {
        let msg = tokio::select! {
            event = outbound.recv() => match event {
                Some(event) => match serde_json::to_string(&event) {
                    Ok(json) => Message::Text(json),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode outbound event");
                        continue;
                    }
                },
                None => {
                    // Deregistered by the instance (shutdown)
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            control = control.recv() => match control {
                Some(msg) => msg,
                None => break,
            },
        };

        let closing = matches!(msg, Message::Close(_));
        if sink.send(msg).await.is_err() || closing {
            break;
        }
    }
}

/// Ping periodically and give up on the client if a pong does not come back
async fn heartbeat_task(
    control: mpsc::UnboundedSender<Message>,
    mut pongs: mpsc::UnboundedReceiver<()>,
    heartbeat: Heartbeat,
) {
    let mut ticker = interval(heartbeat.ping_interval);
    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        ticker.tick().await;

        while pongs.try_recv().is_ok() {}
        if control.send(Message::Ping(b"relay".to_vec())).is_err() {
            break; // Writer is gone
        }

        match timeout(heartbeat.pong_timeout, pongs.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!("Pong timeout, closing connection");
                let _ = control.send(Message::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }
}
