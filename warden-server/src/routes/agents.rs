//! Agent onboarding endpoints
//!
//! POST /agents registers an agent and hands out its one-time registration
//! token; POST /agents/activate exchanges that token for the client secret.
//! Dashboard-style CRUD stays outside this server.

use crate::error::Result;
use crate::state::AppState;
use actix_web::{post, web, HttpResponse, Responder};
use serde::Deserialize;
use warden_core::scope::ScopeTier;

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub name: String,
    #[serde(default)]
    pub max_tier: ScopeTier,
}

#[post("/agents")]
pub async fn register_agent(
    state: web::Data<AppState>,
    body: web::Json<RegisterBody>,
) -> Result<impl Responder> {
    let registration = state.registry.register(&body.name, body.max_tier).await?;
    Ok(HttpResponse::Created().json(registration))
}

#[derive(Debug, Deserialize)]
pub struct ActivateBody {
    pub client_id: String,
    pub registration_token: String,
}

#[post("/agents/activate")]
pub async fn activate_agent(
    state: web::Data<AppState>,
    body: web::Json<ActivateBody>,
) -> Result<impl Responder> {
    let activated = state
        .registry
        .activate(&body.client_id, &body.registration_token)
        .await?;
    Ok(HttpResponse::Ok().json(activated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::token::token;
    use crate::state::test_support::test_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_register_activate_issue() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .service(register_agent)
                .service(activate_agent)
                .service(token),
        )
        .await;

        let request = test::TestRequest::post()
            .uri("/agents")
            .set_json(serde_json::json!({"name": "scheduler", "max_tier": "standard"}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 201);
        let registered: serde_json::Value = test::read_body_json(response).await;

        let request = test::TestRequest::post()
            .uri("/agents/activate")
            .set_json(serde_json::json!({
                "client_id": registered["client_id"],
                "registration_token": registered["registration_token"],
            }))
            .to_request();
        let activated: serde_json::Value = test::call_and_read_body_json(&app, request).await;

        let request = test::TestRequest::post()
            .uri("/token")
            .set_json(serde_json::json!({
                "grant_type": "client_credentials",
                "client_id": activated["client_id"],
                "client_secret": activated["client_secret"],
                "scope": ["read:a"],
            }))
            .to_request();
        let issued: serde_json::Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(issued["token_type"], "Bearer");
    }

    #[actix_web::test]
    async fn test_activation_is_single_use() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .service(register_agent)
                .service(activate_agent),
        )
        .await;

        let request = test::TestRequest::post()
            .uri("/agents")
            .set_json(serde_json::json!({"name": "scheduler"}))
            .to_request();
        let registered: serde_json::Value = test::call_and_read_body_json(&app, request).await;

        let activate = serde_json::json!({
            "client_id": registered["client_id"],
            "registration_token": registered["registration_token"],
        });

        let request = test::TestRequest::post()
            .uri("/agents/activate")
            .set_json(activate.clone())
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), 200);

        let request = test::TestRequest::post()
            .uri("/agents/activate")
            .set_json(activate)
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), 401);
    }
}
