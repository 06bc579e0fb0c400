//! Box tunnel endpoint: WebSocket handshake and frame loop
//!
//! Each connection moves through Connected -> Identified -> Disconnected.
//! The socket is split: a writer task drains the box's command channel into
//! the sink, and the reader loop below feeds RESPONSE frames to the
//! correlation engine.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use boxgate_control::{BoxCommand, BoxHandle, IdentifyError};
use boxgate_proto::{Frame, CLOSE_INVALID_IDENTITY};

use crate::AppState;

/// Close code for a connection that breaks the handshake or frame protocol
const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// Close code for a gateway-side failure during the handshake
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Upgrade handler for `GET /ws/box`
pub async fn box_socket(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_box_connection(socket, state))
}

async fn handle_box_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    // Connected: the first frame on a connection must be IDENTIFY
    let provided = match read_frame(&mut stream).await {
        Some(Ok(Frame::Identify { box_id })) => box_id,
        Some(Ok(frame)) => {
            debug!(?frame, "Handshake failed: first frame was not IDENTIFY");
            close(&mut sink, CLOSE_PROTOCOL_ERROR, "expected IDENTIFY").await;
            return;
        }
        Some(Err(error)) => {
            debug!(error = %error, "Handshake failed: malformed first frame");
            close(&mut sink, CLOSE_PROTOCOL_ERROR, "malformed frame").await;
            return;
        }
        None => return,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = BoxHandle::new(tx);
    let conn_id = handle.conn_id();

    let identified = match state.gateway.identify_box(provided.as_deref(), handle).await {
        Ok(identified) => identified,
        Err(IdentifyError::InvalidIdentity) => {
            info!(provided = ?provided, "Rejecting box with unresolvable identity");
            close(&mut sink, CLOSE_INVALID_IDENTITY, "invalid identity").await;
            return;
        }
        Err(IdentifyError::Store(error)) => {
            warn!(error = %error, "Status store failed during handshake");
            close(&mut sink, CLOSE_INTERNAL_ERROR, "identity lookup failed").await;
            return;
        }
    };

    let box_id = identified.box_id.clone();
    info!(box_id = %box_id, conn_id = %conn_id, provisioned = identified.provisioned, "Box identified");

    // Writer task: owns the sink for the rest of the connection. Any
    // PROVISION queued during identification is flushed first.
    let writer = tokio::spawn(writer_task(sink, rx));

    // Identified: every inbound frame is expected to be a RESPONSE
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(error) => {
                debug!(box_id = %box_id, error = %error, "Tunnel read error");
                break;
            }
        };

        match message {
            Message::Text(text) => match Frame::decode(text.as_str()) {
                Ok(Frame::Response {
                    request_id,
                    payload,
                }) => {
                    state.gateway.resolve_response(&request_id, payload);
                }
                Ok(frame) => {
                    warn!(box_id = %box_id, ?frame, "Unexpected frame from identified box");
                    break;
                }
                Err(error) => {
                    warn!(box_id = %box_id, error = %error, "Undecodable frame from box");
                    break;
                }
            },
            Message::Close(_) => break,
            Message::Binary(_) => {
                warn!(box_id = %box_id, "Binary message from box");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // Disconnected: drop the registration unless a newer connection owns it
    state.gateway.disconnect_box(&box_id, conn_id).await;
    info!(box_id = %box_id, conn_id = %conn_id, "Box disconnected");

    // Dropping the registry entry closes the command channel; the writer
    // drains and exits on its own.
    let _ = writer.await;
}

async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<BoxCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            BoxCommand::Frame(frame) => {
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(error) => {
                        warn!(error = %error, "Failed to encode outbound frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            BoxCommand::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
}

/// Read the next frame, skipping pings. `None` means the connection ended.
async fn read_frame(
    stream: &mut SplitStream<WebSocket>,
) -> Option<Result<Frame, boxgate_proto::FrameError>> {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(Frame::decode(text.as_str())),
            Ok(Message::Binary(_)) => return Some(Err(boxgate_proto::FrameError::NonTextMessage)),
            Ok(Message::Close(_)) => return None,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Err(_) => return None,
        }
    }
    None
}

async fn close(sink: &mut SplitSink<WebSocket, Message>, code: u16, reason: &'static str) {
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}
