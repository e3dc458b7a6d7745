//! WebSocket transport for live connections.
//!
//! Every frame is a JSON text frame `{ "event": <name>, "data": <payload> }`.
//! Outbound events for a connection (acks, catch-up frames and room
//! broadcasts) all flow through its single router queue, so a connection
//! sees them in the order they were enqueued. A writer task drains that
//! queue into the socket while the reader loop handles inbound frames.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use telewatch_core::{InboundMessage, OutboundEvent, Session};

use super::AppState;

/// `GET /ws` with `Upgrade: websocket`.
#[allow(clippy::unused_async)] // Required for axum handler
pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (mut session, mut events) = state.pipeline.open_session();
    let connection = session.id();
    debug!(%connection, "live connection opened");

    let mut writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(event.as_ref()) {
                Ok(text) => text,
                Err(e) => {
                    warn!(%connection, event = event.name(), error = %e, "failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(&state, &mut session, text.as_str()).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    reject(&state, &session, "binary frames are not supported".into());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(%connection, error = %e, "live connection read failed");
                    break;
                }
                // Ping/pong are answered by axum.
                Some(Ok(_)) => {}
            },
            _ = &mut writer => break,
        }
    }

    session.disconnect();
    writer.abort();
    debug!(%connection, "live connection closed");
}

async fn handle_frame(state: &AppState, session: &mut Session, text: &str) {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(InboundMessage::Subscribe(req)) => {
            // The ack and any catch-up frames are queued by the session.
            session.subscribe(req).await;
        }
        Err(e) => {
            debug!(connection = %session.id(), error = %e, "malformed inbound frame");
            reject(state, session, format!("malformed message: {e}"));
        }
    }
}

/// Answer a bad frame with an `error` event; the connection stays open.
fn reject(state: &AppState, session: &Session, message: String) {
    state
        .pipeline
        .router()
        .send_to(session.id(), OutboundEvent::Error { message });
}
