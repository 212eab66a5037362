//! Wallet route handlers
//!
//! Balance enquiry and account linkage. Account opening belongs to the
//! external wallet provider; linkage only attaches an existing ledger
//! account to the caller.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::{authenticate, failure, read_json, success};
use crate::server::http::AppState;
use crate::types::SendchatError;

type Body = Full<Bytes>;

#[derive(Debug, Deserialize)]
struct LinkWalletRequest {
    account_no: String,
}

/// GET /wallet/enquiry — the caller's linked account and balances
pub async fn handle_enquiry(state: Arc<AppState>, req: Request<Incoming>) -> Response<Body> {
    let claims = match authenticate(&state, &req) {
        Ok(claims) => claims,
        Err(err) => return failure(&err),
    };

    let account_no = match state.directory.linked_account(claims.sub) {
        Ok(Some(account_no)) => account_no,
        Ok(None) => {
            return failure(&SendchatError::AccountNotLinked(format!(
                "user {}",
                claims.sub
            )))
        }
        Err(err) => return failure(&err),
    };

    match state.ledger.balances(&account_no) {
        Ok(balances) => success(
            "Wallet retrieved",
            json!({
                "account_no": account_no,
                "available_balance": balances.available,
                "held_balance": balances.held,
            }),
        ),
        Err(err) => failure(&err),
    }
}

/// POST /wallet/link — link an existing ledger account to the caller
pub async fn handle_link(state: Arc<AppState>, req: Request<Incoming>) -> Response<Body> {
    let claims = match authenticate(&state, &req) {
        Ok(claims) => claims,
        Err(err) => return failure(&err),
    };
    let body: LinkWalletRequest = match read_json(req).await {
        Ok(body) => body,
        Err(err) => return failure(&err),
    };

    if !state.ledger.contains(&body.account_no) {
        return failure(&SendchatError::NotFound(format!(
            "account {}",
            body.account_no
        )));
    }

    match state.directory.link_wallet(claims.sub, &body.account_no) {
        Ok(()) => success("Wallet linked", json!({ "account_no": body.account_no })),
        Err(err) => failure(&err),
    }
}
