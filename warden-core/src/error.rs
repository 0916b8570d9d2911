//! Error taxonomy for the authorization engine

use serde::{Deserialize, Serialize};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Machine-readable error kind, stable across the API boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing request parameters
    InvalidRequest,

    /// Unknown client or bad credentials
    InvalidClient,

    /// Bad, expired, or replayed code/refresh token, PKCE mismatch
    InvalidGrant,

    /// Requested scope is not a subset of the caller's authority
    InsufficientScope,

    /// Explicit or default deny from the policy evaluator
    PolicyDenied,

    /// Ancestor-chain invariant broken
    LineageInvalid,

    /// Delegation chain too deep
    DepthExceeded,

    /// Token has been revoked
    TokenRevoked,

    /// Token is past its expiry
    TokenExpired,

    /// Scope name not present in the catalog
    UnknownScope,

    /// Storage or other internal fault
    ServerError,
}

impl ErrorKind {
    /// Wire representation of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::InvalidClient => "invalid_client",
            ErrorKind::InvalidGrant => "invalid_grant",
            ErrorKind::InsufficientScope => "insufficient_scope",
            ErrorKind::PolicyDenied => "policy_denied",
            ErrorKind::LineageInvalid => "lineage_invalid",
            ErrorKind::DepthExceeded => "depth_exceeded",
            ErrorKind::TokenRevoked => "token_revoked",
            ErrorKind::TokenExpired => "token_expired",
            ErrorKind::UnknownScope => "unknown_scope",
            ErrorKind::ServerError => "server_error",
        }
    }
}

/// Engine-level errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed or missing request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown client, inactive client, or bad credentials
    #[error("Invalid client: {0}")]
    InvalidClient(String),

    /// Bad, expired, or replayed grant material
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    /// Requested scope exceeds the caller's authority
    #[error("Insufficient scope: {0}")]
    InsufficientScope(String),

    /// Denied by policy
    #[error("Denied by policy: {}", .policy.as_deref().unwrap_or("default deny"))]
    PolicyDenied {
        /// Name of the matched deny rule, if any (default deny carries none)
        policy: Option<String>,
    },

    /// Ancestor-chain invariant broken
    #[error("Lineage invalid: {0}")]
    LineageInvalid(String),

    /// Delegation chain too deep
    #[error("Delegation depth exceeded: {current} >= {max}")]
    DepthExceeded {
        /// Depth the chain already has
        current: u8,
        /// Maximum allowed by the grant
        max: u8,
    },

    /// Token has been revoked
    #[error("Token revoked")]
    TokenRevoked,

    /// Token is past its expiry
    #[error("Token expired at {0}")]
    TokenExpired(chrono::DateTime<chrono::Utc>),

    /// Scope name not present in the catalog
    #[error("Unknown scope: {0}")]
    UnknownScope(String),

    /// Catalog or policy configuration rejected at load time
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistence-layer fault
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Machine-readable kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            AuthError::InvalidClient(_) => ErrorKind::InvalidClient,
            AuthError::InvalidGrant(_) => ErrorKind::InvalidGrant,
            AuthError::InsufficientScope(_) => ErrorKind::InsufficientScope,
            AuthError::PolicyDenied { .. } => ErrorKind::PolicyDenied,
            AuthError::LineageInvalid(_) => ErrorKind::LineageInvalid,
            AuthError::DepthExceeded { .. } => ErrorKind::DepthExceeded,
            AuthError::TokenRevoked => ErrorKind::TokenRevoked,
            AuthError::TokenExpired(_) => ErrorKind::TokenExpired,
            AuthError::UnknownScope(_) => ErrorKind::UnknownScope,
            AuthError::Config(_) | AuthError::Storage(_) | AuthError::Internal(_) => {
                ErrorKind::ServerError
            }
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::InvalidRequest(_) => 400,
            AuthError::InvalidClient(_) => 401,
            AuthError::InvalidGrant(_) => 400,
            AuthError::InsufficientScope(_) => 403,
            AuthError::PolicyDenied { .. } => 403,
            AuthError::LineageInvalid(_) => 403,
            AuthError::DepthExceeded { .. } => 403,
            AuthError::TokenRevoked => 401,
            AuthError::TokenExpired(_) => 401,
            AuthError::UnknownScope(_) => 400,
            AuthError::Config(_) => 500,
            AuthError::Storage(_) => 500,
            AuthError::Internal(_) => 500,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Storage(_) | AuthError::Internal(_))
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Internal(format!("JSON error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AuthError::InvalidGrant(format!("token encoding: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(ErrorKind::InvalidGrant.as_str(), "invalid_grant");
        assert_eq!(ErrorKind::PolicyDenied.as_str(), "policy_denied");
        assert_eq!(
            serde_json::to_string(&ErrorKind::InsufficientScope).unwrap(),
            "\"insufficient_scope\""
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::InvalidClient("x".into()).status_code(), 401);
        assert_eq!(AuthError::InvalidGrant("x".into()).status_code(), 400);
        assert_eq!(
            AuthError::PolicyDenied { policy: None }.status_code(),
            403
        );
        assert_eq!(AuthError::Storage("x".into()).status_code(), 500);
    }

    #[test]
    fn test_server_faults_collapse_to_server_error() {
        assert_eq!(AuthError::Storage("x".into()).kind(), ErrorKind::ServerError);
        assert_eq!(AuthError::Config("x".into()).kind(), ErrorKind::ServerError);
    }
}
