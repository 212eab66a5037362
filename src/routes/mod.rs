//! HTTP route handlers
//!
//! Every response uses the envelope
//! `{"status": "success"|"error", "message": ..., "data": ...}`; error
//! bodies additionally carry the stable error `kind`, which is the
//! authoritative signal for clients regardless of status code.

pub mod chat;
pub mod dev;
pub mod health;
pub mod wallet;

pub use health::{health_check, version_info};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::auth::{extract_token_from_header, extract_token_from_query, Claims};
use crate::server::http::AppState;
use crate::types::{Result, SendchatError};

type Body = Full<Bytes>;

/// Success envelope with HTTP 200
pub fn success(message: &str, data: Value) -> Response<Body> {
    let body = json!({
        "status": "success",
        "message": message,
        "data": data,
    });
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_default()
}

/// Error envelope; status code derived from the error kind
pub fn failure(err: &SendchatError) -> Response<Body> {
    let body = json!({
        "status": "error",
        "kind": err.kind(),
        "message": err.to_string(),
    });
    Response::builder()
        .status(err.status_code())
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_default()
}

/// Verified claims from Authorization header or `?token=` query
pub fn authenticate(state: &AppState, req: &Request<Incoming>) -> Result<Claims> {
    let auth_header = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = extract_token_from_header(auth_header)
        .map(|t| t.to_string())
        .or_else(|| extract_token_from_query(req.uri().query()))
        .ok_or_else(|| SendchatError::Unauthorized("Authentication required".into()))?;

    let result = state.jwt.verify_token(&token);
    match result.claims {
        Some(claims) if result.valid => Ok(claims),
        _ => Err(SendchatError::Unauthorized(
            result.error.unwrap_or_else(|| "Invalid token".into()),
        )),
    }
}

/// Collect and decode a JSON request body
pub async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T> {
    let body = req
        .collect()
        .await
        .map_err(|e| SendchatError::InvalidArgument(format!("Failed to read body: {}", e)))?
        .to_bytes();
    Ok(serde_json::from_slice(&body)?)
}

/// Single query string parameter
pub fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    let query = query?;
    for param in query.split('&') {
        if let Some((k, value)) = param.split_once('=') {
            if k == key {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param() {
        assert_eq!(
            query_param(Some("limit=20&offset=5"), "offset").as_deref(),
            Some("5")
        );
        assert_eq!(query_param(Some("limit=20"), "offset"), None);
        assert_eq!(query_param(None, "offset"), None);
    }

    #[test]
    fn test_failure_envelope_carries_kind() {
        let response = failure(&SendchatError::InsufficientFunds("short".into()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
