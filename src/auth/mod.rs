//! Authentication for Sendchat
//!
//! Session identity is verified before any subscribe or transfer operation
//! runs. Token issuance lives with the external identity provider; this
//! module only validates (and, in dev mode, mints) HS256 session tokens.

pub mod jwt;

pub use jwt::{
    extract_token_from_header, extract_token_from_query, Claims, JwtValidator,
    TokenValidationResult,
};
