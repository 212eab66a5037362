//! Shared types for Sendchat

pub mod error;

pub use error::{Result, SendchatError};
