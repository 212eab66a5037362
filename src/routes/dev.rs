//! Dev provisioning
//!
//! Available only with DEV_MODE: registers a user, opens a funded ledger
//! account, links it and returns a signed session token. Production
//! identity issuance lives with the external identity provider.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::{failure, read_json, success};
use crate::server::http::AppState;
use crate::types::SendchatError;

type Body = Full<Bytes>;

#[derive(Debug, Deserialize)]
struct ProvisionUserRequest {
    username: String,
    opening_balance: Option<Decimal>,
}

/// POST /dev/users — register a dev user with a funded, linked wallet
pub async fn handle_provision_user(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Body> {
    let body: ProvisionUserRequest = match read_json(req).await {
        Ok(body) => body,
        Err(err) => return failure(&err),
    };
    if body.username.trim().is_empty() {
        return failure(&SendchatError::InvalidArgument(
            "username must not be empty".into(),
        ));
    }

    let opening = body.opening_balance.unwrap_or_else(|| Decimal::new(100000, 2));
    if opening < Decimal::ZERO {
        return failure(&SendchatError::InvalidArgument(
            "opening balance must be non-negative".into(),
        ));
    }

    let profile = state.directory.register(body.username.trim());
    let account_no = state.ledger.generate_account_number();
    if let Err(err) = state.ledger.open_account(&account_no, opening) {
        return failure(&err);
    }
    if let Err(err) = state.directory.link_wallet(profile.id, &account_no) {
        return failure(&err);
    }

    let token = match state.jwt.generate_token(profile.id, &profile.username) {
        Ok(token) => token,
        Err(err) => return failure(&err),
    };

    info!(user = %profile.id, username = %profile.username, "Dev user provisioned");
    success(
        "User provisioned",
        json!({
            "user_id": profile.id,
            "username": profile.username,
            "account_no": account_no,
            "opening_balance": opening,
            "token": token,
        }),
    )
}
