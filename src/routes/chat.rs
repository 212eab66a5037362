//! Chat route handlers
//!
//! Conversations, messages and in-conversation transfers. All endpoints
//! require a valid session token; fan-out to live subscribers happens
//! after the state change succeeds, never before.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::{authenticate, failure, query_param, read_json, success};
use crate::chat::ConversationKind;
use crate::hub::{self, ChatEvent};
use crate::server::http::AppState;
use crate::transfer::TransferAction;
use crate::types::SendchatError;

type Body = Full<Bytes>;

#[derive(Debug, Deserialize)]
struct CreateDirectRequest {
    other_user_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct CreateGroupRequest {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddMemberRequest {
    user_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    chat_id: Uuid,
    content: String,
}

#[derive(Debug, Deserialize)]
struct InitiateTransferRequest {
    chat_id: Uuid,
    amount: Decimal,
    narration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RespondTransferRequest {
    message_id: Uuid,
    action: TransferAction,
}

/// POST /chat/direct — create or return the direct conversation with
/// another user
pub async fn handle_create_direct(state: Arc<AppState>, req: Request<Incoming>) -> Response<Body> {
    let claims = match authenticate(&state, &req) {
        Ok(claims) => claims,
        Err(err) => return failure(&err),
    };
    let body: CreateDirectRequest = match read_json(req).await {
        Ok(body) => body,
        Err(err) => return failure(&err),
    };

    match state
        .registry
        .create_or_get_direct(claims.sub, body.other_user_id)
    {
        Ok(conversation) => success(
            "Chat ready",
            serde_json::to_value(&conversation).unwrap_or_default(),
        ),
        Err(err) => failure(&err),
    }
}

/// POST /chat/rooms — create a group conversation
pub async fn handle_create_group(state: Arc<AppState>, req: Request<Incoming>) -> Response<Body> {
    let claims = match authenticate(&state, &req) {
        Ok(claims) => claims,
        Err(err) => return failure(&err),
    };
    let body: CreateGroupRequest = match read_json(req).await {
        Ok(body) => body,
        Err(err) => return failure(&err),
    };

    match state.registry.create_group(claims.sub, body.name) {
        Ok(conversation) => success(
            "Group created",
            serde_json::to_value(&conversation).unwrap_or_default(),
        ),
        Err(err) => failure(&err),
    }
}

/// POST /chat/rooms/{id}/members — add a member to a group conversation
pub async fn handle_add_member(
    state: Arc<AppState>,
    req: Request<Incoming>,
    conversation_id: Uuid,
) -> Response<Body> {
    let claims = match authenticate(&state, &req) {
        Ok(claims) => claims,
        Err(err) => return failure(&err),
    };
    let body: AddMemberRequest = match read_json(req).await {
        Ok(body) => body,
        Err(err) => return failure(&err),
    };

    match state
        .registry
        .add_member(conversation_id, claims.sub, body.user_id)
    {
        Ok(()) => success("Member added", serde_json::Value::Null),
        Err(err) => failure(&err),
    }
}

/// GET /chat/my_chats?chat_type=direct|group — the caller's conversations
pub async fn handle_my_chats(state: Arc<AppState>, req: Request<Incoming>) -> Response<Body> {
    let claims = match authenticate(&state, &req) {
        Ok(claims) => claims,
        Err(err) => return failure(&err),
    };

    let kind = match query_param(req.uri().query(), "chat_type").as_deref() {
        Some("direct") => Some(ConversationKind::Direct),
        Some("group") => Some(ConversationKind::Group),
        Some(other) => {
            return failure(&SendchatError::InvalidArgument(format!(
                "unknown chat_type: {}",
                other
            )))
        }
        None => None,
    };

    let rows = state.registry.conversations_for_user(claims.sub, kind);
    success(
        "Chats retrieved",
        serde_json::to_value(&rows).unwrap_or_default(),
    )
}

/// GET /chat/contacts — the caller's contact list
pub async fn handle_contacts(state: Arc<AppState>, req: Request<Incoming>) -> Response<Body> {
    let claims = match authenticate(&state, &req) {
        Ok(claims) => claims,
        Err(err) => return failure(&err),
    };

    let contacts: Vec<_> = state
        .directory
        .contacts_of(claims.sub)
        .into_iter()
        .map(|p| json!({ "id": p.id, "username": p.username }))
        .collect();
    success("Contacts retrieved", serde_json::Value::Array(contacts))
}

/// GET /chat/messages/{id}?limit&offset — page of a conversation's messages
pub async fn handle_list_messages(
    state: Arc<AppState>,
    req: Request<Incoming>,
    conversation_id: Uuid,
) -> Response<Body> {
    let claims = match authenticate(&state, &req) {
        Ok(claims) => claims,
        Err(err) => return failure(&err),
    };

    if let Err(err) = state.registry.get(conversation_id) {
        return failure(&err);
    }
    if !state.registry.is_member(conversation_id, claims.sub) {
        return failure(&SendchatError::AccessDenied(
            "not a member of this conversation".into(),
        ));
    }

    let query = req.uri().query();
    let limit = query_param(query, "limit")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(50)
        .min(state.args.message_page_max);
    let offset = query_param(query, "offset")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    match state.messages.list(conversation_id, limit, offset, |id| {
        state.transfers.status_of(id)
    }) {
        Ok(messages) => success(
            "Messages retrieved",
            serde_json::to_value(&messages).unwrap_or_default(),
        ),
        Err(err) => failure(&err),
    }
}

/// POST /chat/send_message — append a text message and fan it out
pub async fn handle_send_message(state: Arc<AppState>, req: Request<Incoming>) -> Response<Body> {
    let claims = match authenticate(&state, &req) {
        Ok(claims) => claims,
        Err(err) => return failure(&err),
    };
    let body: SendMessageRequest = match read_json(req).await {
        Ok(body) => body,
        Err(err) => return failure(&err),
    };

    match state.messages.append(
        body.chat_id,
        claims.sub,
        &body.content,
        crate::chat::MessageKind::Text,
        None,
    ) {
        Ok(message) => {
            hub::broadcast_message(&state, &message);
            let view = state
                .messages
                .view(&message, |id| state.transfers.status_of(id));
            success(
                "Message sent",
                serde_json::to_value(&view).unwrap_or_default(),
            )
        }
        Err(err) => failure(&err),
    }
}

/// POST /chat/transfer/initiate — hold funds and announce the transfer
pub async fn handle_initiate_transfer(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Body> {
    let claims = match authenticate(&state, &req) {
        Ok(claims) => claims,
        Err(err) => return failure(&err),
    };
    let body: InitiateTransferRequest = match read_json(req).await {
        Ok(body) => body,
        Err(err) => return failure(&err),
    };

    match state
        .transfers
        .initiate(body.chat_id, claims.sub, body.amount, body.narration)
    {
        Ok((message, record)) => {
            let view = state
                .messages
                .view(&message, |id| state.transfers.status_of(id));
            state.hub.publish(
                message.conversation_id,
                &ChatEvent::transfer_initiated(view.clone(), &record),
            );
            success(
                "Transfer initiated",
                json!({
                    "message": view,
                    "transfer": {
                        "id": record.id,
                        "reference": record.reference,
                        "amount": record.amount,
                        "narration": record.narration,
                        "status": record.status,
                    },
                }),
            )
        }
        Err(err) => failure(&err),
    }
}

/// POST /chat/transfer/handle — accept or reject a pending transfer
pub async fn handle_respond_transfer(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Body> {
    let claims = match authenticate(&state, &req) {
        Ok(claims) => claims,
        Err(err) => return failure(&err),
    };
    let body: RespondTransferRequest = match read_json(req).await {
        Ok(body) => body,
        Err(err) => return failure(&err),
    };

    match state
        .transfers
        .respond(body.message_id, claims.sub, body.action)
    {
        Ok(resolution) => {
            state.hub.publish(
                resolution.conversation_id,
                &ChatEvent::transfer_updated(&resolution),
            );
            success(
                "Transfer handled",
                serde_json::to_value(&resolution).unwrap_or_default(),
            )
        }
        Err(err) => failure(&err),
    }
}
