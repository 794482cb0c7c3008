//! The websocket transport
//!
//! One connection = one session. Inbound frames are JSON
//! `{event: "message_to_server", payload: {content}}`; outbound frames
//! are `{event: "message", payload: {type, content, name?}}`. The
//! transport owns nothing but the socket: session state lives in the
//! registry, world state behind the world lock.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::service::OutboundMessage;
use crate::session::AUTH_GREETING;
use crate::ServerCtx;

/// Inbound frame envelope
#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(default)]
    event: String,
    #[serde(default)]
    payload: ClientPayload,
}

#[derive(Debug, Default, Deserialize)]
struct ClientPayload {
    #[serde(default)]
    content: String,
}

pub fn router(ctx: ServerCtx) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(ctx)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(ctx): State<ServerCtx>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, ctx))
}

async fn handle_socket(socket: WebSocket, ctx: ServerCtx) {
    let session_id = Uuid::now_v7().to_string();
    info!("Session {session_id} connected");

    let (tx, rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let shutdown = CancellationToken::new();
    ctx.sessions
        .lock()
        .await
        .register(session_id.clone(), tx, shutdown.clone());

    // First contact: the auth wizard's greeting
    ctx.send_to_session(&session_id, OutboundMessage::system(AUTH_GREETING))
        .await;

    let (mut sink, mut stream) = socket.split();

    // Outbound: drain the session channel into websocket frames
    let outbound = {
        let shutdown = shutdown.clone();
        async move {
            let mut rx = UnboundedReceiverStream::new(rx);
            loop {
                tokio::select! {
                    maybe = rx.next() => {
                        let Some(message) = maybe else { break };
                        let frame = json!({ "event": "message", "payload": message });
                        let Ok(text) = serde_json::to_string(&frame) else { continue };
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    () = shutdown.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    };

    // Inbound: route every content line through the dispatcher
    let inbound = {
        let ctx = ctx.clone();
        let session_id = session_id.clone();
        let shutdown = shutdown.clone();
        async move {
            loop {
                let frame = tokio::select! {
                    frame = stream.next() => frame,
                    () = shutdown.cancelled() => break,
                };
                match frame {
                    Some(Ok(Message::Text(raw))) => {
                        let Ok(parsed) = serde_json::from_str::<ClientFrame>(&raw) else {
                            debug!("Session {session_id}: unparseable frame");
                            continue;
                        };
                        if parsed.event != "message_to_server" {
                            continue;
                        }
                        ctx.handle_line(&session_id, &parsed.payload.content).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!("Session {session_id}: socket error: {err}");
                        break;
                    }
                }
            }
        }
    };

    tokio::join!(outbound, inbound);

    // Teardown: unbind the Player, cancel trades, drop counters. The
    // User and sheet persist.
    ctx.disconnect(&session_id).await;
    info!("Session {session_id} disconnected");
}
