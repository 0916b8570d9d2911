//! API error mapping
//!
//! Engine errors cross the HTTP boundary as
//! `{"error": <kind>, "error_description": <detail>}` with the status the
//! taxonomy prescribes. Internal faults keep their detail in the log, not
//! in the response body.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use warden_core::error::{AuthError, ErrorKind};

pub type Result<T> = std::result::Result<T, ApiError>;

/// An engine error crossing the API boundary
#[derive(Debug)]
pub struct ApiError(pub AuthError);

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    /// Shorthand for a malformed request
    pub fn invalid_request(detail: impl Into<String>) -> Self {
        ApiError(AuthError::InvalidRequest(detail.into()))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        let kind = self.0.kind();

        // Internal detail stays in the log
        let description = if kind == ErrorKind::ServerError {
            tracing::error!(error = %self.0, "internal error");
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": kind.as_str(),
            "error_description": description,
        }))
    }
}
