//! Authorization endpoint (PKCE)
//!
//! GET /authorize
//! Issues a single-use authorization code bound to the supplied PKCE
//! challenge, or answers with a consent-required payload for privileged
//! scope.

use crate::error::{ApiError, Result};
use crate::state::AppState;
use actix_web::http::header;
use actix_web::{get, web, HttpResponse, Responder};
use serde::Deserialize;
use url::Url;
use warden_core::oauth::{AuthorizeOutcome, AuthorizeRequest};

fn default_method() -> String {
    "S256".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    /// Space-delimited, per RFC 6749 query encoding
    pub scope: String,
    #[serde(default)]
    pub state: Option<String>,
    pub code_challenge: String,
    #[serde(default = "default_method")]
    pub code_challenge_method: String,
    /// `approved` marks a completed consent step
    #[serde(default)]
    pub consent: Option<String>,
}

#[get("/authorize")]
pub async fn authorize(
    state: web::Data<AppState>,
    query: web::Query<AuthorizeQuery>,
) -> Result<impl Responder> {
    let query = query.into_inner();

    if query.response_type != "code" {
        return Err(ApiError::invalid_request(format!(
            "unsupported response_type '{}'",
            query.response_type
        )));
    }

    let outcome = state
        .engine
        .authorize(AuthorizeRequest {
            client_id: query.client_id,
            redirect_uri: query.redirect_uri,
            scope: query.scope.split_whitespace().map(str::to_string).collect(),
            state: query.state,
            code_challenge: query.code_challenge,
            code_challenge_method: query.code_challenge_method,
            consent_approved: query.consent.as_deref() == Some("approved"),
        })
        .await?;

    match outcome {
        AuthorizeOutcome::Redirect {
            code,
            state,
            redirect_uri,
        } => {
            let mut location = Url::parse(&redirect_uri)
                .map_err(|_| ApiError::invalid_request("redirect_uri is not a valid URL"))?;
            {
                let mut pairs = location.query_pairs_mut();
                pairs.append_pair("code", &code);
                if let Some(state) = &state {
                    pairs.append_pair("state", state);
                }
            }
            Ok(HttpResponse::Found()
                .insert_header((header::LOCATION, location.to_string()))
                .finish())
        }
        AuthorizeOutcome::ConsentRequired {
            client_id,
            scope,
            tier,
        } => Ok(HttpResponse::Ok().json(serde_json::json!({
            "consent_required": true,
            "client_id": client_id,
            "scope": scope,
            "tier": tier,
        }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use actix_web::{test, App};
    use warden_core::token::pkce_challenge_s256;

    #[actix_web::test]
    async fn test_authorize_redirects_with_code_and_state() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .service(authorize),
        )
        .await;

        let challenge = pkce_challenge_s256("a-sufficiently-long-test-verifier");
        let uri = format!(
            "/authorize?response_type=code&client_id=agent-1&redirect_uri=https://app.example/cb&scope=read:a&state=xyz&code_challenge={}&code_challenge_method=S256",
            challenge
        );
        let request = test::TestRequest::get().uri(&uri).to_request();
        let response = test::call_service(&app, request).await;

        assert_eq!(response.status(), 302);
        let location = response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(location.starts_with("https://app.example/cb?code="));
        assert!(location.contains("state=xyz"));
    }

    #[actix_web::test]
    async fn test_wrong_response_type_rejected() {
        let state = test_state().await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .service(authorize),
        )
        .await;

        let request = test::TestRequest::get()
            .uri("/authorize?response_type=token&client_id=agent-1&redirect_uri=https://app.example/cb&scope=read:a&code_challenge=x")
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 400);
    }
}
