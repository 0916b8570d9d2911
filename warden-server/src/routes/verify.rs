//! Verification endpoint
//!
//! POST /verify
//! Re-walks the token's ancestor chain; a broken invariant anywhere in the
//! chain invalidates the leaf.

use crate::error::Result;
use crate::state::AppState;
use actix_web::{post, web, HttpResponse, Responder};
use warden_core::oauth::VerifyRequest;

#[post("/verify")]
pub async fn verify(
    state: web::Data<AppState>,
    body: web::Json<VerifyRequest>,
) -> Result<impl Responder> {
    let outcome = state.engine.verify(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::revoke::revoke;
    use crate::routes::token::token;
    use crate::state::test_support::test_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_verify_live_token() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .service(token)
                .service(verify),
        )
        .await;

        let issue = test::TestRequest::post()
            .uri("/token")
            .set_json(serde_json::json!({
                "grant_type": "client_credentials",
                "client_id": "agent-1",
                "client_secret": "agent-secret",
                "scope": ["read:a"],
                "task_id": "task-42",
            }))
            .to_request();
        let issued: serde_json::Value = test::call_and_read_body_json(&app, issue).await;

        let request = test::TestRequest::post()
            .uri("/verify")
            .set_json(serde_json::json!({
                "token": issued["access_token"],
                "task_id": "task-42",
            }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["verified"], true);
        assert_eq!(body["task_id"], "task-42");
    }

    #[actix_web::test]
    async fn test_verify_revoked_token_is_401() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .service(token)
                .service(revoke)
                .service(verify),
        )
        .await;

        let issue = test::TestRequest::post()
            .uri("/token")
            .set_json(serde_json::json!({
                "grant_type": "client_credentials",
                "client_id": "agent-1",
                "client_secret": "agent-secret",
                "scope": ["read:a"],
            }))
            .to_request();
        let issued: serde_json::Value = test::call_and_read_body_json(&app, issue).await;

        let request = test::TestRequest::post()
            .uri("/revoke")
            .set_json(serde_json::json!({"token": issued["access_token"]}))
            .to_request();
        test::call_service(&app, request).await;

        let request = test::TestRequest::post()
            .uri("/verify")
            .set_json(serde_json::json!({"token": issued["access_token"]}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 401);
        let body: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(body["error"], "token_revoked");
    }
}
