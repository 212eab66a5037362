//! Error types for Sendchat
//!
//! Every domain failure carries a stable kind string plus a human-readable
//! message. The kind is the authoritative signal for clients; the HTTP
//! status code is derived from it at the transport boundary.

use hyper::StatusCode;

/// Main error type for Sendchat operations
#[derive(Debug, thiserror::Error)]
pub enum SendchatError {
    /// Caller is not a conversation member, or not the transfer receiver
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Self-transfer, non-positive amount, malformed input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A participant has no linked wallet account
    #[error("Account not linked: {0}")]
    AccountNotLinked(String),

    /// Available balance below the requested hold
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Held balance below the requested release/settle
    #[error("Insufficient held balance: {0}")]
    InsufficientHeld(String),

    /// Transfer already completed or rejected
    #[error("Transfer already finalized: {0}")]
    AlreadyFinalized(String),

    /// User is already a member of the conversation
    #[error("Already a member: {0}")]
    AlreadyMember(String),

    /// Operation not supported for this conversation kind
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SendchatError {
    /// Stable machine-readable kind, independent of transport status codes
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AccessDenied(_) => "access_denied",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::AccountNotLinked(_) => "account_not_linked",
            Self::InsufficientFunds(_) => "insufficient_funds",
            Self::InsufficientHeld(_) => "insufficient_held",
            Self::AlreadyFinalized(_) => "already_finalized",
            Self::AlreadyMember(_) => "already_member",
            Self::Unsupported(_) => "unsupported",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::AccountNotLinked(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientFunds(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientHeld(_) => StatusCode::CONFLICT,
            Self::AlreadyFinalized(_) => StatusCode::CONFLICT,
            Self::AlreadyMember(_) => StatusCode::CONFLICT,
            Self::Unsupported(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for SendchatError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for SendchatError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArgument(format!("JSON error: {}", err))
    }
}

/// Result type alias for Sendchat operations
pub type Result<T> = std::result::Result<T, SendchatError>;
