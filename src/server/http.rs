//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling; one spawned task per
//! connection, WebSocket upgrades enabled.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::JwtValidator;
use crate::chat::{ConversationRegistry, MessageStore};
use crate::config::Args;
use crate::directory::UserDirectory;
use crate::hub::{self, HubStore};
use crate::ledger::LedgerStore;
use crate::routes;
use crate::transfer::TransferEngine;
use crate::types::{Result, SendchatError};

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub jwt: JwtValidator,
    pub directory: Arc<UserDirectory>,
    pub registry: Arc<ConversationRegistry>,
    pub messages: Arc<MessageStore>,
    pub ledger: Arc<LedgerStore>,
    pub transfers: Arc<TransferEngine>,
    pub hub: Arc<HubStore>,
}

impl AppState {
    pub fn new(args: Args) -> Result<Self> {
        let jwt = if args.dev_mode {
            JwtValidator::new_dev()
        } else {
            let secret = args.jwt_secret.clone().ok_or_else(|| {
                SendchatError::Config("JWT_SECRET is required in production mode".into())
            })?;
            JwtValidator::new(secret, args.jwt_expiry_seconds)?
        };

        let directory = Arc::new(UserDirectory::new());
        let registry = Arc::new(ConversationRegistry::new(Arc::clone(&directory)));
        let messages = Arc::new(MessageStore::new(
            Arc::clone(&registry),
            Arc::clone(&directory),
        ));
        let ledger = Arc::new(LedgerStore::new());
        let transfers = Arc::new(TransferEngine::new(
            Arc::clone(&directory),
            Arc::clone(&ledger),
            Arc::clone(&messages),
        ));
        let hub = Arc::new(HubStore::new(args.ws_max_clients));

        Ok(Self {
            args,
            jwt,
            directory,
            registry,
            messages,
            ledger,
            transfers,
            hub,
        })
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Sendchat listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - dev provisioning active, insecure JWT secret");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state))
        }

        // Version info for deployment verification
        (Method::GET, "/version") => routes::version_info(),

        // CORS preflight
        (Method::OPTIONS, _) => preflight_response(),

        // WebSocket subscription: /chat/ws/{conversation_id}
        (Method::GET, p) if p.starts_with("/chat/ws/") => {
            let id_str = p.strip_prefix("/chat/ws/").unwrap_or("");
            match Uuid::parse_str(id_str) {
                Ok(conversation_id) => {
                    if hyper_tungstenite::is_upgrade_request(&req) {
                        hub::handle_chat_upgrade(state, req, conversation_id).await
                    } else {
                        routes::failure(&SendchatError::InvalidArgument(
                            "WebSocket upgrade required for /chat/ws/{conversation_id}".into(),
                        ))
                    }
                }
                Err(_) => routes::failure(&SendchatError::InvalidArgument(
                    "Invalid conversation id".into(),
                )),
            }
        }

        // Conversations
        (Method::POST, "/chat/direct") => routes::chat::handle_create_direct(state, req).await,
        (Method::POST, "/chat/rooms") => routes::chat::handle_create_group(state, req).await,
        (Method::POST, p) if p.starts_with("/chat/rooms/") && p.ends_with("/members") => {
            let id_str = p
                .strip_prefix("/chat/rooms/")
                .and_then(|s| s.strip_suffix("/members"))
                .unwrap_or("");
            match Uuid::parse_str(id_str) {
                Ok(conversation_id) => {
                    routes::chat::handle_add_member(state, req, conversation_id).await
                }
                Err(_) => routes::failure(&SendchatError::InvalidArgument(
                    "Invalid conversation id".into(),
                )),
            }
        }
        (Method::GET, "/chat/my_chats") => routes::chat::handle_my_chats(state, req).await,
        (Method::GET, "/chat/contacts") => routes::chat::handle_contacts(state, req).await,

        // Messages
        (Method::GET, p) if p.starts_with("/chat/messages/") => {
            let id_str = p.strip_prefix("/chat/messages/").unwrap_or("");
            match Uuid::parse_str(id_str) {
                Ok(conversation_id) => {
                    routes::chat::handle_list_messages(state, req, conversation_id).await
                }
                Err(_) => routes::failure(&SendchatError::InvalidArgument(
                    "Invalid conversation id".into(),
                )),
            }
        }
        (Method::POST, "/chat/send_message") => {
            routes::chat::handle_send_message(state, req).await
        }

        // Transfers
        (Method::POST, "/chat/transfer/initiate") => {
            routes::chat::handle_initiate_transfer(state, req).await
        }
        (Method::POST, "/chat/transfer/handle") => {
            routes::chat::handle_respond_transfer(state, req).await
        }

        // Wallet
        (Method::GET, "/wallet/enquiry") => routes::wallet::handle_enquiry(state, req).await,
        (Method::POST, "/wallet/link") => routes::wallet::handle_link(state, req).await,

        // Dev provisioning (dev mode only)
        (Method::POST, "/dev/users") if state.args.dev_mode => {
            routes::dev::handle_provision_user(state, req).await
        }

        // Not found
        _ => routes::failure(&SendchatError::NotFound(format!("path {}", path))),
    };

    Ok(response)
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(hyper::StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap_or_default()
}
