//! Introspection endpoint
//!
//! POST /introspect
//! Dead tokens answer `{"active": false}` and nothing else.

use crate::error::Result;
use crate::state::AppState;
use actix_web::{post, web, HttpResponse, Responder};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct IntrospectBody {
    pub token: String,
}

#[post("/introspect")]
pub async fn introspect(
    state: web::Data<AppState>,
    body: web::Json<IntrospectBody>,
) -> Result<impl Responder> {
    let response = state.engine.introspect(&body.token).await?;
    Ok(HttpResponse::Ok().json(response))
}
