//! Per-connection websocket handling: join bookkeeping, heartbeat replies
//! and opaque signal fan-out.

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{ChannelRegistry, JoinOutcome};
use crate::protocol::{is_valid_session_id, ClientFrame, ServerFrame};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(registry): State<ChannelRegistry>,
) -> Response {
    // Malformed ids are rejected before the upgrade, so no channel state is
    // ever created for them.
    if !is_valid_session_id(&session_id) {
        warn!(%session_id, "rejecting websocket for malformed session id");
        return (StatusCode::BAD_REQUEST, "session id must be six digits").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, registry))
}

async fn handle_socket(socket: WebSocket, session_id: String, registry: ChannelRegistry) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    // Writer: everything addressed to this peer funnels through one channel.
    // Once every sender is gone (handler returned, membership dropped) the
    // queue drains and the close handshake completes, so a rejected or
    // departing peer sees a clean Close rather than a dead socket.
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&frame) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    // Set once the Join frame is accepted.
    let mut member: Option<String> = None;

    while let Some(result) = receiver.next().await {
        let message = match result {
            Ok(message) => message,
            Err(err) => {
                debug!(%session_id, %err, "websocket error");
                break;
            }
        };
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => {
                    match handle_client_frame(frame, &session_id, &mut member, &registry, &tx) {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(err) => {
                            warn!(%session_id, %err, "error handling client frame");
                            let _ = tx.send(ServerFrame::Error {
                                message: format!("failed to process frame: {err}"),
                            });
                        }
                    }
                }
                Err(err) => {
                    warn!(%session_id, %err, "unparseable client frame");
                    let _ = tx.send(ServerFrame::Error {
                        message: format!("invalid frame: {err}"),
                    });
                }
            },
            Message::Close(_) => break,
            // Protocol-level ping/pong is answered by axum.
            _ => {}
        }
    }

    if let Some(peer_id) = member {
        if registry.leave(&session_id, &peer_id) {
            registry.broadcast_except(
                &session_id,
                &peer_id,
                ServerFrame::PeerLeft {
                    peer_id: peer_id.clone(),
                },
            );
            info!(%session_id, %peer_id, "peer disconnected");
        }
    }
}

/// Returns `Ok(false)` when the connection should be closed.
fn handle_client_frame(
    frame: ClientFrame,
    session_id: &str,
    member: &mut Option<String>,
    registry: &ChannelRegistry,
    tx: &mpsc::UnboundedSender<ServerFrame>,
) -> Result<bool> {
    match frame {
        ClientFrame::Join { peer_id } => {
            if member.is_some() {
                tx.send(ServerFrame::Error {
                    message: "already joined".into(),
                })?;
                return Ok(true);
            }
            match registry.join(session_id, &peer_id, tx.clone()) {
                JoinOutcome::Admitted { role } => {
                    info!(%session_id, %peer_id, ?role, "peer joined");
                    tx.send(ServerFrame::JoinAck {
                        session_id: session_id.to_string(),
                        peer_id: peer_id.clone(),
                        role,
                    })?;
                    registry.broadcast_except(
                        session_id,
                        &peer_id,
                        ServerFrame::PeerJoined {
                            peer_id: peer_id.clone(),
                        },
                    );
                    *member = Some(peer_id);
                    Ok(true)
                }
                JoinOutcome::Full => {
                    info!(%session_id, %peer_id, "join rejected, session is full");
                    tx.send(ServerFrame::JoinError {
                        reason: "session is full".into(),
                    })?;
                    Ok(false)
                }
            }
        }
        ClientFrame::Signal { payload } => {
            let Some(peer_id) = member.as_deref() else {
                tx.send(ServerFrame::Error {
                    message: "join the session before signaling".into(),
                })?;
                return Ok(true);
            };
            // Opaque fan-out; with no other member this is a silent no-op.
            registry.broadcast_except(
                session_id,
                peer_id,
                ServerFrame::Signal {
                    from_peer: peer_id.to_string(),
                    payload,
                },
            );
            Ok(true)
        }
        ClientFrame::Ping => {
            tx.send(ServerFrame::Pong)?;
            Ok(true)
        }
    }
}
