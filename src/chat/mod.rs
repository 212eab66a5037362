//! Conversations and messages
//!
//! The registry owns membership and access control for direct and group
//! conversations; the message store owns the append-only per-conversation
//! log, including the synthetic transfer messages the transfer engine
//! appends.

pub mod messages;
pub mod registry;

pub use messages::{Message, MessageKind, MessageStore, MessageView};
pub use registry::{Conversation, ConversationKind, ConversationRegistry, ConversationSummary};
