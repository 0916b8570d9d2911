//! Revocation endpoint
//!
//! POST /revoke
//! Always answers 200 with the same message, whether or not the token
//! existed (RFC 7009-style non-disclosure). Descendant revocation is on by
//! default.

use crate::error::Result;
use crate::state::AppState;
use actix_web::{post, web, HttpResponse, Responder};
use serde::Deserialize;

fn default_revoke_children() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct RevokeBody {
    pub token: String,
    #[serde(default = "default_revoke_children")]
    pub revoke_children: bool,
}

#[post("/revoke")]
pub async fn revoke(
    state: web::Data<AppState>,
    body: web::Json<RevokeBody>,
) -> Result<impl Responder> {
    state
        .engine
        .revoke(&body.token, body.revoke_children)
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Token revoked successfully",
    })))
}
