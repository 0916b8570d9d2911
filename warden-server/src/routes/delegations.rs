//! Delegation grant endpoints
//!
//! POST /delegations, GET /delegations, GET /delegations/{id},
//! POST /delegations/{id}/revoke

use crate::error::Result;
use crate::state::AppState;
use actix_web::{get, post, web, HttpResponse, Responder};
use uuid::Uuid;
use warden_core::delegation::CreateGrantRequest;

#[post("/delegations")]
pub async fn create_delegation(
    state: web::Data<AppState>,
    body: web::Json<CreateGrantRequest>,
) -> Result<impl Responder> {
    let grant = state
        .engine
        .delegation()
        .create_grant(body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(grant))
}

#[get("/delegations")]
pub async fn list_delegations(state: web::Data<AppState>) -> Result<impl Responder> {
    let grants = state.engine.delegation().list().await?;
    Ok(HttpResponse::Ok().json(grants))
}

#[get("/delegations/{id}")]
pub async fn get_delegation(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<impl Responder> {
    match state.engine.delegation().get(path.into_inner()).await? {
        Some(grant) => Ok(HttpResponse::Ok().json(grant)),
        None => Ok(HttpResponse::NotFound().json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "unknown delegation grant",
        }))),
    }
}

#[post("/delegations/{id}/revoke")]
pub async fn revoke_delegation(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<impl Responder> {
    state.engine.delegation().revoke(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Delegation grant revoked",
    })))
}
