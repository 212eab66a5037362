//! Configuration for Sendchat
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// Sendchat - chat gateway with in-conversation wallet transfers
#[derive(Parser, Debug, Clone)]
#[command(name = "sendchat")]
#[command(about = "Real-time chat with escrow-backed wallet transfers")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (dev user provisioning, relaxed JWT secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// JWT secret for session token signing (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "3600")]
    pub jwt_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Maximum concurrent WebSocket subscriptions
    #[arg(long, env = "WS_MAX_CLIENTS", default_value = "16384")]
    pub ws_max_clients: usize,

    /// Upper bound for the message list page size
    #[arg(long, env = "MESSAGE_PAGE_MAX", default_value = "100")]
    pub message_page_max: usize,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            match self.jwt_secret {
                None => return Err("JWT_SECRET is required in production mode".to_string()),
                Some(ref s) if s.len() < 32 => {
                    return Err("JWT_SECRET must be at least 32 characters".to_string());
                }
                _ => {}
            }
        }

        if self.message_page_max == 0 {
            return Err("MESSAGE_PAGE_MAX must be at least 1".to_string());
        }

        Ok(())
    }
}
