//! Token endpoint
//!
//! POST /token
//! Dispatches on `grant_type`: client_credentials, refresh_token, or
//! authorization_code.

use crate::error::{ApiError, Result};
use crate::state::AppState;
use actix_web::{post, web, HttpResponse, Responder};
use serde::{Deserialize, Deserializer};
use uuid::Uuid;
use warden_core::oauth::{ClientCredentialsRequest, CodeExchangeRequest, RefreshRequest};
use warden_core::token::ScopeInheritance;

/// Scope arrives either as a JSON array or a space-delimited string
fn opt_scope<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ScopeField {
        List(Vec<String>),
        Delimited(String),
    }

    Ok(Option::<ScopeField>::deserialize(deserializer)?.map(|field| match field {
        ScopeField::List(list) => list,
        ScopeField::Delimited(s) => s.split_whitespace().map(str::to_string).collect(),
    }))
}

/// Union of the three grant-flow bodies; `grant_type` selects which fields
/// are read
#[derive(Debug, Deserialize)]
pub struct TokenRequestBody {
    pub grant_type: String,

    // client_credentials
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default, deserialize_with = "opt_scope")]
    pub scope: Option<Vec<String>>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub parent_token: Option<String>,
    #[serde(default)]
    pub grant_id: Option<Uuid>,
    #[serde(default)]
    pub scope_inheritance: Option<ScopeInheritance>,
    #[serde(default)]
    pub tenant_id: Option<String>,

    // refresh_token
    #[serde(default)]
    pub refresh_token: Option<String>,

    // authorization_code
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

fn required<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| ApiError::invalid_request(format!("{} is required", name)))
}

#[post("/token")]
pub async fn token(
    state: web::Data<AppState>,
    body: web::Json<TokenRequestBody>,
) -> Result<impl Responder> {
    let body = body.into_inner();

    let response = match body.grant_type.as_str() {
        "client_credentials" => {
            state
                .engine
                .client_credentials(ClientCredentialsRequest {
                    client_id: required(body.client_id, "client_id")?,
                    client_secret: required(body.client_secret, "client_secret")?,
                    scope: required(body.scope, "scope")?,
                    tools: body.tools,
                    task_id: body.task_id,
                    parent_task_id: body.parent_task_id,
                    parent_token: body.parent_token,
                    grant_id: body.grant_id,
                    scope_inheritance: body.scope_inheritance.unwrap_or_default(),
                    tenant_id: body.tenant_id,
                })
                .await?
        }
        "refresh_token" => {
            state
                .engine
                .refresh(RefreshRequest {
                    refresh_token: required(body.refresh_token, "refresh_token")?,
                    scope: body.scope.unwrap_or_default(),
                })
                .await?
        }
        "authorization_code" => {
            state
                .engine
                .exchange_code(CodeExchangeRequest {
                    code: required(body.code, "code")?,
                    code_verifier: required(body.code_verifier, "code_verifier")?,
                    client_id: required(body.client_id, "client_id")?,
                    redirect_uri: required(body.redirect_uri, "redirect_uri")?,
                })
                .await?
        }
        other => {
            return Err(ApiError::invalid_request(format!(
                "unsupported grant_type '{}'",
                other
            )));
        }
    };

    Ok(HttpResponse::Ok().json(response))
}
