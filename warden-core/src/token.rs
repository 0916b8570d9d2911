//! Issued tokens, authorization codes, and token material
//!
//! Token rows are immutable after issuance except for revocation state;
//! refresh produces a new row, never an in-place mutation. Only SHA-256
//! hashes of presented material are ever stored.

use crate::error::{AuthError, Result};
use crate::keys::KeyProvider;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Scope-inheritance mode of a child token relative to its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScopeInheritance {
    /// Child scope must be a strict subset of the parent's
    #[default]
    Restricted,

    /// Child copies the parent scope verbatim
    Full,
}

impl ScopeInheritance {
    /// A child may never loosen the mode relative to its parent: under a
    /// `Restricted` parent only `Restricted` children are permitted.
    pub fn permitted_under(self, parent: ScopeInheritance) -> bool {
        match parent {
            ScopeInheritance::Restricted => self == ScopeInheritance::Restricted,
            ScopeInheritance::Full => true,
        }
    }
}

/// An issued access/refresh credential, the central entity of the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuedToken {
    /// Token identifier (the JWT `jti`)
    pub id: Uuid,

    /// Owning agent's client id
    pub agent_id: String,

    /// SHA-256 hex of the access-token string
    pub access_token_hash: String,

    /// SHA-256 hex of the refresh-token string, when one was minted
    pub refresh_token_hash: Option<String>,

    /// Granted scope set
    pub scope: BTreeSet<String>,

    /// Granted tool/resource identifiers
    pub tools: Vec<String>,

    /// Task correlation id
    pub task_id: String,

    /// Parent task correlation id
    pub parent_task_id: Option<String>,

    /// Lineage edge; `None` for root tokens
    pub parent_token_id: Option<Uuid>,

    /// Delegation grant this token was minted under
    pub grant_id: Option<Uuid>,

    /// Scope-inheritance mode
    pub inheritance: ScopeInheritance,

    /// Issuance timestamp
    pub issued_at: DateTime<Utc>,

    /// Access-token expiry timestamp
    pub expires_at: DateTime<Utc>,

    /// Refresh-token expiry; refresh material outlives the access token
    pub refresh_expires_at: Option<DateTime<Utc>>,

    /// Revocation state
    pub revoked: bool,

    /// When the token was revoked
    pub revoked_at: Option<DateTime<Utc>>,

    /// Why the token was revoked
    pub revocation_reason: Option<String>,

    /// PKCE challenge, populated only by the authorization-code flow
    pub code_challenge: Option<String>,

    /// PKCE challenge method, populated only by the authorization-code flow
    pub code_challenge_method: Option<CodeChallengeMethod>,

    /// Hashed authorization code this token was exchanged from
    pub auth_code_hash: Option<String>,
}

impl IssuedToken {
    /// Whether the token is past its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the token is neither revoked nor expired at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }

    /// Remaining lifetime in whole seconds, clamped at zero
    pub fn expires_in(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// Short-lived, single-use artifact binding a hashed code to a client,
/// redirect URI, scope, and PKCE challenge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// Code identifier
    pub id: Uuid,

    /// SHA-256 hex of the code string
    pub code_hash: String,

    /// Requesting client id
    pub client_id: String,

    /// Redirect URI the exchange must repeat exactly
    pub redirect_uri: String,

    /// Requested scope
    pub scope: BTreeSet<String>,

    /// Opaque client state echoed on redirect
    pub state: Option<String>,

    /// PKCE challenge
    pub code_challenge: String,

    /// PKCE challenge method
    pub code_challenge_method: CodeChallengeMethod,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Expiry timestamp
    pub expires_at: DateTime<Utc>,

    /// Consumption timestamp; set exactly once
    pub consumed_at: Option<DateTime<Utc>>,
}

impl AuthorizationCode {
    /// Whether the code is past its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// PKCE code-challenge method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    /// `base64url(SHA-256(verifier))` comparison
    #[serde(rename = "S256")]
    S256,

    /// Direct string comparison
    #[serde(rename = "plain")]
    Plain,
}

impl std::str::FromStr for CodeChallengeMethod {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "S256" => Ok(CodeChallengeMethod::S256),
            "plain" => Ok(CodeChallengeMethod::Plain),
            other => Err(AuthError::InvalidRequest(format!(
                "unsupported code_challenge_method '{}'",
                other
            ))),
        }
    }
}

/// SHA-256 hex digest of a presented string
pub fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// 32 bytes of CSPRNG output, base64url without padding
///
/// Used for refresh tokens, authorization codes, client secrets, and
/// registration tokens.
pub fn random_opaque() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 challenge for a verifier: `base64url(SHA-256(verifier))`
pub fn pkce_challenge_s256(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Check a verifier against a stored challenge
pub fn verify_pkce(method: CodeChallengeMethod, challenge: &str, verifier: &str) -> bool {
    match method {
        CodeChallengeMethod::S256 => pkce_challenge_s256(verifier) == challenge,
        CodeChallengeMethod::Plain => verifier == challenge,
    }
}

/// Claims carried by an access-token JWT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Token id
    pub jti: Uuid,

    /// Owning agent's client id
    pub sub: String,

    /// Issuer
    pub iss: String,

    /// Space-delimited granted scope
    pub scope: String,

    /// Task correlation id
    pub task_id: String,

    /// Parent token id, when the token has a lineage parent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uuid>,

    /// Issued-at (unix seconds)
    pub iat: i64,

    /// Expiry (unix seconds)
    pub exp: i64,
}

impl AccessClaims {
    /// Build claims for a token row
    pub fn for_token(token: &IssuedToken, issuer: &str) -> Self {
        Self {
            jti: token.id,
            sub: token.agent_id.clone(),
            iss: issuer.to_string(),
            scope: token
                .scope
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(" "),
            task_id: token.task_id.clone(),
            parent: token.parent_token_id,
            iat: token.issued_at.timestamp(),
            exp: token.expires_at.timestamp(),
        }
    }

    /// Encode to a signed JWT via the key provider
    pub fn encode(&self, keys: &dyn KeyProvider) -> Result<String> {
        let mut header = jsonwebtoken::Header::new(keys.algorithm());
        header.kid = keys.key_id().map(str::to_string);
        jsonwebtoken::encode(&header, self, keys.encoding_key())
            .map_err(|e| AuthError::Internal(format!("failed to encode access token: {}", e)))
    }

    /// Decode and signature-check a presented JWT
    ///
    /// Expiry is validated by the caller, which owns clock-skew policy.
    pub fn decode(token: &str, keys: &dyn KeyProvider) -> Result<Self> {
        let mut validation = jsonwebtoken::Validation::new(keys.algorithm());
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<AccessClaims>(token, keys.decoding_key(), &validation)
            .map_err(|e| AuthError::InvalidGrant(format!("malformed access token: {}", e)))?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::StaticKeyProvider;

    fn token_row() -> IssuedToken {
        let now = Utc::now();
        IssuedToken {
            id: Uuid::new_v4(),
            agent_id: "agent-1".to_string(),
            access_token_hash: sha256_hex("access"),
            refresh_token_hash: Some(sha256_hex("refresh")),
            scope: ["read:a".to_string(), "write:b".to_string()].into(),
            tools: vec![],
            task_id: "task-1".to_string(),
            parent_task_id: None,
            parent_token_id: None,
            grant_id: None,
            inheritance: ScopeInheritance::Restricted,
            issued_at: now,
            expires_at: now + chrono::Duration::hours(1),
            refresh_expires_at: Some(now + chrono::Duration::days(30)),
            revoked: false,
            revoked_at: None,
            revocation_reason: None,
            code_challenge: None,
            code_challenge_method: None,
            auth_code_hash: None,
        }
    }

    #[test]
    fn test_active_and_expiry() {
        let token = token_row();
        let now = Utc::now();
        assert!(token.is_active(now));
        assert!(!token.is_active(now + chrono::Duration::hours(2)));
        assert!(token.expires_in(now) > 3590);
    }

    #[test]
    fn test_inheritance_never_loosened() {
        use ScopeInheritance::*;
        assert!(Restricted.permitted_under(Restricted));
        assert!(!Full.permitted_under(Restricted));
        assert!(Restricted.permitted_under(Full));
        assert!(Full.permitted_under(Full));
    }

    #[test]
    fn test_pkce_s256_round_trip() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = pkce_challenge_s256(verifier);
        assert!(verify_pkce(CodeChallengeMethod::S256, &challenge, verifier));
        assert!(!verify_pkce(
            CodeChallengeMethod::S256,
            &challenge,
            "some-other-verifier"
        ));
    }

    #[test]
    fn test_pkce_known_vector() {
        // RFC 7636 appendix B
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            pkce_challenge_s256(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_pkce_plain() {
        assert!(verify_pkce(CodeChallengeMethod::Plain, "abc", "abc"));
        assert!(!verify_pkce(CodeChallengeMethod::Plain, "abc", "abd"));
    }

    #[test]
    fn test_challenge_method_parsing() {
        assert_eq!(
            "S256".parse::<CodeChallengeMethod>().unwrap(),
            CodeChallengeMethod::S256
        );
        assert_eq!(
            "plain".parse::<CodeChallengeMethod>().unwrap(),
            CodeChallengeMethod::Plain
        );
        assert!("s256".parse::<CodeChallengeMethod>().is_err());
    }

    #[test]
    fn test_random_opaque_uniqueness() {
        let a = random_opaque();
        let b = random_opaque();
        assert_ne!(a, b);
        assert!(a.len() >= 40);
    }

    #[test]
    fn test_claims_round_trip() {
        let keys = StaticKeyProvider::hs256(b"test-secret");
        let token = token_row();
        let claims = AccessClaims::for_token(&token, "https://warden.example");

        let jwt = claims.encode(&keys).unwrap();
        let decoded = AccessClaims::decode(&jwt, &keys).unwrap();

        assert_eq!(decoded.jti, token.id);
        assert_eq!(decoded.sub, "agent-1");
        assert_eq!(decoded.scope, "read:a write:b");
    }

    #[test]
    fn test_claims_reject_wrong_key() {
        let keys = StaticKeyProvider::hs256(b"test-secret");
        let other = StaticKeyProvider::hs256(b"other-secret");
        let claims = AccessClaims::for_token(&token_row(), "https://warden.example");

        let jwt = claims.encode(&keys).unwrap();
        assert!(AccessClaims::decode(&jwt, &other).is_err());
    }
}
