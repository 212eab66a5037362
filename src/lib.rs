//! Sendchat - real-time chat with escrow-backed wallet transfers
//!
//! A single-process gateway: conversations fan out over WebSockets, and a
//! transfer inside a direct conversation moves money through a hold ->
//! accept/reject escrow whose lifecycle is reported back into the same
//! message stream.

pub mod auth;
pub mod chat;
pub mod config;
pub mod directory;
pub mod hub;
pub mod ledger;
pub mod routes;
pub mod server;
pub mod transfer;
pub mod types;

pub use types::{Result, SendchatError};
