//! Broadcast hub
//!
//! WebSocket subscriptions per conversation and event fan-out. A client
//! upgrades at `/chat/ws/{conversation_id}` (membership is checked before
//! the upgrade), then receives every message and transfer event posted to
//! that conversation while connected. Inbound text frames append a message
//! and fan it out; any append failure terminates the connection.

pub mod store;

pub use store::HubStore;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_tungstenite::WebSocketStream;
use hyper_util::rt::TokioIo;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{extract_token_from_header, extract_token_from_query, Claims};
use crate::chat::{Message, MessageKind, MessageView};
use crate::server::http::AppState;
use crate::transfer::{TransferRecord, TransferResolution, TransferStatus};
use crate::types::Result;

/// Event fanned out to conversation subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Subscribe acknowledgement, sent to the new handle only
    Connection {
        message: String,
        conversation_id: Uuid,
        member_id: Uuid,
        username: String,
    },
    /// A new message in the conversation
    Message {
        #[serde(flatten)]
        message: MessageView,
    },
    /// A transfer was initiated; carries the announcing message
    TransferInitiated {
        #[serde(flatten)]
        message: MessageView,
        reference: String,
        amount: Decimal,
        narration: Option<String>,
    },
    /// A pending transfer reached a terminal status
    TransferUpdated {
        conversation_id: Uuid,
        transfer_id: Uuid,
        message_id: Uuid,
        reference: String,
        amount: Decimal,
        status: TransferStatus,
    },
}

impl ChatEvent {
    pub fn message(view: MessageView) -> Self {
        Self::Message { message: view }
    }

    pub fn transfer_initiated(view: MessageView, record: &TransferRecord) -> Self {
        Self::TransferInitiated {
            message: view,
            reference: record.reference.clone(),
            amount: record.amount,
            narration: record.narration.clone(),
        }
    }

    pub fn transfer_updated(resolution: &TransferResolution) -> Self {
        Self::TransferUpdated {
            conversation_id: resolution.conversation_id,
            transfer_id: resolution.transfer_id,
            message_id: resolution.message_id,
            reference: resolution.reference.clone(),
            amount: resolution.amount,
            status: resolution.status,
        }
    }
}

/// Inbound client frame
#[derive(Debug, Deserialize)]
struct InboundFrame {
    content: String,
}

/// Join the live view of a message and fan it out to its conversation
pub fn broadcast_message(state: &AppState, message: &Message) {
    let view = state
        .messages
        .view(message, |id| state.transfers.status_of(id));
    state.hub.publish(message.conversation_id, &ChatEvent::message(view));
}

/// Handle a WebSocket upgrade request for a conversation subscription.
///
/// Identity and membership are verified before the protocol upgrade, so an
/// unauthorized client never holds a socket.
pub async fn handle_chat_upgrade(
    state: Arc<AppState>,
    req: Request<Incoming>,
    conversation_id: Uuid,
) -> Response<Full<Bytes>> {
    let claims = match authenticate_upgrade(&state, &req) {
        Some(claims) => claims,
        None => {
            warn!(conversation = %conversation_id, "WebSocket upgrade rejected: bad credentials");
            return reject(StatusCode::UNAUTHORIZED, "Authentication required");
        }
    };

    if !state.registry.is_member(conversation_id, claims.sub) {
        warn!(
            conversation = %conversation_id,
            member = %claims.sub,
            "WebSocket upgrade rejected: not a member"
        );
        return reject(StatusCode::FORBIDDEN, "Not a member of this conversation");
    }

    if state.hub.is_at_capacity() {
        warn!("WebSocket upgrade rejected: hub at capacity");
        return reject(StatusCode::SERVICE_UNAVAILABLE, "Too many connections");
    }

    match hyper_tungstenite::upgrade(req, None) {
        Ok((response, websocket)) => {
            let member_id = claims.sub;
            let username = claims.username;
            info!(
                conversation = %conversation_id,
                member = %member_id,
                username = %username,
                "WebSocket upgrade accepted"
            );

            tokio::spawn(async move {
                match websocket.await {
                    Ok(ws) => {
                        run_connection(state, ws, conversation_id, member_id, username).await;
                    }
                    Err(e) => {
                        error!("WebSocket upgrade failed: {:?}", e);
                    }
                }
            });

            let (parts, _) = response.into_parts();
            Response::from_parts(parts, Full::new(Bytes::new()))
        }
        Err(e) => {
            error!("WebSocket upgrade error: {:?}", e);
            reject(StatusCode::BAD_REQUEST, "WebSocket upgrade failed")
        }
    }
}

/// Subscription lifecycle for one connection.
///
/// A dedicated writer task drains the event channel to the socket; the
/// read loop appends inbound text messages and fans them out. Either side
/// failing tears the whole connection down and deregisters it.
async fn run_connection(
    state: Arc<AppState>,
    ws: WebSocketStream<TokioIo<hyper::upgrade::Upgraded>>,
    conversation_id: Uuid,
    member_id: Uuid,
    username: String,
) {
    let (mut sink, mut stream) = ws.split();

    // The pre-upgrade capacity check is best-effort; this is the
    // authoritative one.
    let Some((connection_id, mut events)) = state.hub.subscribe(conversation_id, member_id)
    else {
        warn!(conversation = %conversation_id, "Hub at capacity, dropping new connection");
        let _ = sink.close().await;
        return;
    };

    // Acknowledge this handle only
    state.hub.send_to(
        connection_id,
        ChatEvent::Connection {
            message: "Connected".to_string(),
            conversation_id,
            member_id,
            username,
        },
    );

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode event: {}", e);
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                if let Err(err) = handle_inbound(&state, conversation_id, member_id, &text) {
                    warn!(
                        connection = %connection_id,
                        error = %err,
                        "Inbound message rejected, closing connection"
                    );
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => {
                debug!(connection = %connection_id, "Client closed connection");
                break;
            }
            // Pings are answered by the protocol layer
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %connection_id, "Connection error: {}", e);
                break;
            }
        }
    }

    // Dropping the subscription closes the event channel, which ends the
    // writer task after it drains.
    state.hub.unsubscribe(connection_id);
    let _ = writer.await;
    info!(connection = %connection_id, conversation = %conversation_id, "Connection closed");
}

/// Append an inbound text frame as a message and fan it out
fn handle_inbound(
    state: &AppState,
    conversation_id: Uuid,
    member_id: Uuid,
    text: &str,
) -> Result<()> {
    let frame: InboundFrame = serde_json::from_str(text)?;
    let message = state.messages.append(
        conversation_id,
        member_id,
        &frame.content,
        MessageKind::Text,
        None,
    )?;
    broadcast_message(state, &message);
    Ok(())
}

/// Extract verified claims from query token or Authorization header
fn authenticate_upgrade(state: &AppState, req: &Request<Incoming>) -> Option<Claims> {
    let token = extract_token_from_query(req.uri().query()).or_else(|| {
        let auth_header = req
            .headers()
            .get(hyper::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        extract_token_from_header(auth_header).map(|t| t.to_string())
    })?;

    let result = state.jwt.verify_token(&token);
    if result.valid {
        result.claims
    } else {
        None
    }
}

fn reject(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "status": "error",
        "message": message,
    });
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_default()
}
