//! OAuth Engine
//!
//! The orchestrator over the scope catalog, policy evaluator, delegation
//! engine, and credential store: implements the three grant flows, token
//! introspection, revocation with cascade, and lineage verification, and
//! emits an audit event for every operation.

use crate::agent::Agent;
use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::delegation::DelegationEngine;
use crate::error::{AuthError, Result};
use crate::keys::KeyProvider;
use crate::policy::{PolicyContext, PolicyEngine};
use crate::scope::{ScopeCatalog, ScopeTier};
use crate::store::CredentialStore;
use crate::token::{
    random_opaque, sha256_hex, verify_pkce, AccessClaims, AuthorizationCode, CodeChallengeMethod,
    IssuedToken, ScopeInheritance,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Serde helper: a scope presented as a JSON array or a space-delimited
/// string deserializes to the same list
pub mod scope_list {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ScopeField {
        List(Vec<String>),
        Delimited(String),
    }

    /// Accept either representation
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match ScopeField::deserialize(deserializer)? {
            ScopeField::List(list) => list,
            ScopeField::Delimited(s) => s.split_whitespace().map(str::to_string).collect(),
        })
    }

    /// Always emit the array form
    pub fn serialize<S>(scope: &[String], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(scope)
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Issuer URL stamped into access tokens
    pub issuer: String,

    /// Access-token lifetime in seconds
    pub access_ttl_secs: i64,

    /// Refresh-token lifetime in seconds
    pub refresh_ttl_secs: i64,

    /// Authorization-code lifetime in seconds
    pub code_ttl_secs: i64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            issuer: "https://warden.local".to_string(),
            access_ttl_secs: crate::DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_ttl_secs: crate::DEFAULT_REFRESH_TOKEN_TTL_SECS,
            code_ttl_secs: crate::DEFAULT_AUTH_CODE_TTL_SECS,
        }
    }
}

/// Client-credentials grant request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ClientCredentialsRequest {
    /// Client identifier
    #[validate(length(min = 1, max = 255))]
    pub client_id: String,

    /// Client secret
    #[validate(length(min = 1))]
    pub client_secret: String,

    /// Requested scope
    #[serde(with = "scope_list")]
    pub scope: Vec<String>,

    /// Requested tool/resource identifiers
    #[serde(default)]
    pub tools: Vec<String>,

    /// Task correlation id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Parent task correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,

    /// Parent access token; links the new token into its lineage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_token: Option<String>,

    /// Delegation grant to mint under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<Uuid>,

    /// Scope-inheritance mode for the new token
    #[serde(default)]
    pub scope_inheritance: ScopeInheritance,

    /// Tenant or partner id, forwarded to policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Refresh-token grant request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RefreshRequest {
    /// The refresh token being rotated
    #[validate(length(min = 1))]
    pub refresh_token: String,

    /// Optional narrowed scope; empty keeps the original scope
    #[serde(default, with = "scope_list")]
    pub scope: Vec<String>,
}

/// Authorization request (`GET /authorize`)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AuthorizeRequest {
    /// Client identifier
    #[validate(length(min = 1, max = 255))]
    pub client_id: String,

    /// Redirect URI for the code
    #[validate(url)]
    pub redirect_uri: String,

    /// Requested scope
    #[serde(with = "scope_list")]
    pub scope: Vec<String>,

    /// Opaque client state echoed back on redirect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// PKCE challenge
    #[validate(length(min = 1))]
    pub code_challenge: String,

    /// PKCE challenge method, `S256` or `plain`
    pub code_challenge_method: String,

    /// Whether a human already approved this authorization
    #[serde(default)]
    pub consent_approved: bool,
}

/// Outcome of the `/authorize` step
#[derive(Debug, Clone)]
pub enum AuthorizeOutcome {
    /// Redirect back to the client with a fresh code
    Redirect {
        /// The plaintext code, handed out exactly once
        code: String,
        /// Echoed client state
        state: Option<String>,
        /// Where to send the redirect
        redirect_uri: String,
    },

    /// The scope tier demands an explicit consent step first
    ConsentRequired {
        /// Requesting client
        client_id: String,
        /// Expanded scope awaiting consent
        scope: Vec<String>,
        /// Tier that triggered the consent gate
        tier: ScopeTier,
    },
}

/// Authorization-code exchange request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CodeExchangeRequest {
    /// The authorization code
    #[validate(length(min = 1))]
    pub code: String,

    /// PKCE verifier matching the challenge bound at `/authorize`
    #[validate(length(min = 1))]
    pub code_verifier: String,

    /// Client identifier
    #[validate(length(min = 1, max = 255))]
    pub client_id: String,

    /// Redirect URI; must repeat the `/authorize` value exactly
    #[validate(length(min = 1))]
    pub redirect_uri: String,
}

/// Verification request (`POST /verify`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// The access token to verify
    pub token: String,

    /// Expected task correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Expected parent task correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,

    /// Expected parent access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_token: Option<String>,

    /// Tolerate bounded clock skew on expiry
    #[serde(default)]
    pub allow_clock_skew: bool,

    /// Skew tolerance in seconds; capped by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_clock_skew_seconds: Option<i64>,
}

/// Successful token issuance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The signed access token
    pub access_token: String,

    /// Refresh token, when the flow mints one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Always `Bearer`
    pub token_type: String,

    /// Access-token lifetime in seconds
    pub expires_in: i64,

    /// Granted scope
    #[serde(with = "scope_list")]
    pub scope: Vec<String>,

    /// Token identifier
    pub token_id: Uuid,

    /// Task correlation id
    pub task_id: String,
}

/// Introspection result; inactive tokens reveal nothing else
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    /// Whether the token is live
    pub active: bool,

    /// Granted scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Vec<String>>,

    /// Owning client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Token identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<Uuid>,

    /// Task correlation id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Parent task correlation id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,

    /// Lineage parent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_token_id: Option<Uuid>,

    /// Expiry (unix seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issued-at (unix seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl IntrospectionResponse {
    /// The uniform answer for missing, revoked, or expired tokens
    pub fn inactive() -> Self {
        Self {
            active: false,
            scope: None,
            client_id: None,
            token_id: None,
            task_id: None,
            parent_task_id: None,
            parent_token_id: None,
            exp: None,
            iat: None,
        }
    }
}

/// Successful verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// Always true on the success path
    pub verified: bool,

    /// Token identifier
    pub token_id: Uuid,

    /// Task correlation id
    pub task_id: String,
}

/// What a mint operation persists; shared tail of every grant flow
struct MintSpec {
    agent_id: String,
    scope: BTreeSet<String>,
    tools: Vec<String>,
    task_id: String,
    parent_task_id: Option<String>,
    parent_token_id: Option<Uuid>,
    grant_id: Option<Uuid>,
    inheritance: ScopeInheritance,
    code: Option<(String, String, CodeChallengeMethod)>,
    audit_kind: AuditKind,
}

/// The orchestrator
pub struct OAuthEngine {
    store: Arc<dyn CredentialStore>,
    catalog: Arc<ScopeCatalog>,
    policy: Arc<PolicyEngine>,
    delegation: DelegationEngine,
    keys: Arc<dyn KeyProvider>,
    audit: Arc<dyn AuditSink>,
    config: OAuthConfig,
}

impl OAuthEngine {
    /// Assemble the engine from its collaborators
    pub fn new(
        store: Arc<dyn CredentialStore>,
        catalog: Arc<ScopeCatalog>,
        policy: Arc<PolicyEngine>,
        delegation: DelegationEngine,
        keys: Arc<dyn KeyProvider>,
        audit: Arc<dyn AuditSink>,
        config: OAuthConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            policy,
            delegation,
            keys,
            audit,
            config,
        }
    }

    /// The delegation engine sharing this engine's store and policy
    pub fn delegation(&self) -> &DelegationEngine {
        &self.delegation
    }

    /// Client-credentials grant
    pub async fn client_credentials(&self, req: ClientCredentialsRequest) -> Result<TokenResponse> {
        req.validate()
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;
        if req.scope.is_empty() {
            return Err(AuthError::InvalidRequest("scope is required".to_string()));
        }

        let now = Utc::now();
        let agent = self.authenticate(&req.client_id, &req.client_secret).await?;

        let mut granted = self.catalog.expand(req.scope.iter().map(String::as_str))?;

        let mut parent: Option<IssuedToken> = None;
        if let Some(parent_token) = &req.parent_token {
            let row = self
                .store
                .token_by_access_hash(&sha256_hex(parent_token))
                .await?
                .ok_or_else(|| AuthError::InvalidGrant("unknown parent token".to_string()))?;

            if row.revoked {
                return Err(AuthError::TokenRevoked);
            }
            if row.is_expired(now) {
                return Err(AuthError::TokenExpired(row.expires_at));
            }
            if !req.scope_inheritance.permitted_under(row.inheritance) {
                return Err(AuthError::LineageInvalid(
                    "child may not loosen the parent's inheritance mode".to_string(),
                ));
            }

            match req.scope_inheritance {
                // Verbatim copy of the parent's scope
                ScopeInheritance::Full => granted = row.scope.clone(),
                ScopeInheritance::Restricted => {
                    let ceiling = self.catalog.expand(row.scope.iter().map(String::as_str))?;
                    if !granted.is_subset(&ceiling) {
                        return Err(AuthError::InsufficientScope(
                            "requested scope is not a subset of the parent token".to_string(),
                        ));
                    }
                }
            }
            parent = Some(row);
        }

        self.check_tier(&agent, &granted)?;

        let mut depth = 0u8;
        if let Some(grant_id) = req.grant_id {
            let grant = self
                .store
                .grant(grant_id)
                .await?
                .ok_or_else(|| AuthError::InvalidGrant("unknown delegation grant".to_string()))?;
            if grant.delegate_id != agent.client_id {
                return Err(AuthError::InvalidGrant(
                    "grant does not delegate to this client".to_string(),
                ));
            }
            if let Some(parent_row) = &parent {
                depth = self
                    .store
                    .ancestor_chain(parent_row.id)
                    .await?
                    .iter()
                    .filter(|t| t.grant_id == Some(grant_id))
                    .count() as u8;
            }
            self.delegation
                .validate_for_issuance(&grant, &granted, &req.tools, depth, now)?;
        }

        let task_id = req
            .task_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut ctx = PolicyContext::for_agent("token:issue", &agent.client_id, now);
        ctx.scopes = granted.clone();
        ctx.tools = req.tools.clone();
        ctx.task_id = Some(task_id.clone());
        ctx.tenant_id = req.tenant_id.clone();
        ctx.delegation_depth = depth;
        self.evaluate_policy(&ctx)?;

        self.mint(MintSpec {
            agent_id: agent.client_id,
            scope: granted,
            tools: req.tools,
            task_id,
            parent_task_id: req.parent_task_id,
            parent_token_id: parent.map(|p| p.id),
            grant_id: req.grant_id,
            inheritance: req.scope_inheritance,
            code: None,
            audit_kind: AuditKind::TokenIssued,
        })
        .await
    }

    /// Refresh-token grant: single-use rotation into a new token row
    pub async fn refresh(&self, req: RefreshRequest) -> Result<TokenResponse> {
        req.validate()
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;

        let now = Utc::now();
        let consumed = self
            .store
            .consume_refresh_token(&sha256_hex(&req.refresh_token), now)
            .await?;

        let agent = self
            .store
            .agent(&consumed.agent_id)
            .await?
            .filter(|a| a.active)
            .ok_or_else(|| AuthError::InvalidClient("client is no longer active".to_string()))?;

        let granted = if req.scope.is_empty() {
            consumed.scope.clone()
        } else {
            let requested = self.catalog.expand(req.scope.iter().map(String::as_str))?;
            let ceiling = self
                .catalog
                .expand(consumed.scope.iter().map(String::as_str))?;
            if !requested.is_subset(&ceiling) {
                return Err(AuthError::InsufficientScope(
                    "refresh may narrow scope, never widen it".to_string(),
                ));
            }
            requested
        };

        let mut ctx = PolicyContext::for_agent("token:refresh", &agent.client_id, now);
        ctx.scopes = granted.clone();
        ctx.tools = consumed.tools.clone();
        ctx.task_id = Some(consumed.task_id.clone());
        self.evaluate_policy(&ctx)?;

        self.mint(MintSpec {
            agent_id: consumed.agent_id.clone(),
            scope: granted,
            tools: consumed.tools.clone(),
            task_id: consumed.task_id.clone(),
            parent_task_id: consumed.parent_task_id.clone(),
            parent_token_id: Some(consumed.id),
            grant_id: consumed.grant_id,
            inheritance: consumed.inheritance,
            code: None,
            audit_kind: AuditKind::TokenRefreshed,
        })
        .await
    }

    /// `/authorize` step of the authorization-code flow
    pub async fn authorize(&self, req: AuthorizeRequest) -> Result<AuthorizeOutcome> {
        req.validate()
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;
        if req.scope.is_empty() {
            return Err(AuthError::InvalidRequest("scope is required".to_string()));
        }
        let method: CodeChallengeMethod = req.code_challenge_method.parse()?;

        let now = Utc::now();
        let agent = self
            .store
            .agent(&req.client_id)
            .await?
            .filter(|a| a.active)
            .ok_or_else(|| AuthError::InvalidClient("unknown client".to_string()))?;

        let scope = self.catalog.expand(req.scope.iter().map(String::as_str))?;
        self.check_tier(&agent, &scope)?;

        let tier = self.catalog.max_tier(scope.iter().map(String::as_str));
        if tier >= ScopeTier::Privileged && !req.consent_approved {
            return Ok(AuthorizeOutcome::ConsentRequired {
                client_id: req.client_id,
                scope: scope.into_iter().collect(),
                tier,
            });
        }

        let mut ctx = PolicyContext::for_agent("code:authorize", &agent.client_id, now);
        ctx.scopes = scope.clone();
        ctx.human_approved = req.consent_approved;
        self.evaluate_policy(&ctx)?;

        let code_plain = random_opaque();
        let code = AuthorizationCode {
            id: Uuid::new_v4(),
            code_hash: sha256_hex(&code_plain),
            client_id: req.client_id,
            redirect_uri: req.redirect_uri.clone(),
            scope,
            state: req.state.clone(),
            code_challenge: req.code_challenge,
            code_challenge_method: method,
            created_at: now,
            expires_at: now + Duration::seconds(self.config.code_ttl_secs),
            consumed_at: None,
        };
        let client_id = code.client_id.clone();
        self.store.insert_code(code).await?;

        self.audit
            .record(AuditEvent::new(AuditKind::CodeIssued).client(client_id))?;

        Ok(AuthorizeOutcome::Redirect {
            code: code_plain,
            state: req.state,
            redirect_uri: req.redirect_uri,
        })
    }

    /// Authorization-code exchange with PKCE proof
    pub async fn exchange_code(&self, req: CodeExchangeRequest) -> Result<TokenResponse> {
        req.validate()
            .map_err(|e| AuthError::InvalidRequest(e.to_string()))?;

        let now = Utc::now();
        let code_hash = sha256_hex(&req.code);

        let code = self
            .store
            .code_by_hash(&code_hash)
            .await?
            .ok_or_else(|| AuthError::InvalidGrant("unknown authorization code".to_string()))?;

        if code.client_id != req.client_id {
            return Err(AuthError::InvalidGrant(
                "authorization code was issued to another client".to_string(),
            ));
        }
        if code.redirect_uri != req.redirect_uri {
            return Err(AuthError::InvalidGrant("redirect_uri mismatch".to_string()));
        }
        if !verify_pkce(
            code.code_challenge_method,
            &code.code_challenge,
            &req.code_verifier,
        ) {
            return Err(AuthError::InvalidGrant("PKCE verification failed".to_string()));
        }

        // Exactly-once: concurrent exchanges race here and one wins
        let code = self.store.consume_code(&code_hash, now).await?;

        let agent = self
            .store
            .agent(&code.client_id)
            .await?
            .filter(|a| a.active)
            .ok_or_else(|| AuthError::InvalidClient("client is no longer active".to_string()))?;

        let task_id = Uuid::new_v4().to_string();
        let mut ctx = PolicyContext::for_agent("token:exchange", &agent.client_id, now);
        ctx.scopes = code.scope.clone();
        ctx.task_id = Some(task_id.clone());
        ctx.human_approved = true;
        self.evaluate_policy(&ctx)?;

        self.mint(MintSpec {
            agent_id: code.client_id.clone(),
            scope: code.scope.clone(),
            tools: vec![],
            task_id,
            parent_task_id: None,
            parent_token_id: None,
            grant_id: None,
            inheritance: ScopeInheritance::Restricted,
            code: Some((
                code.code_hash.clone(),
                code.code_challenge.clone(),
                code.code_challenge_method,
            )),
            audit_kind: AuditKind::CodeExchanged,
        })
        .await
    }

    /// Token introspection; dead tokens yield a bare `active: false`
    pub async fn introspect(&self, token: &str) -> Result<IntrospectionResponse> {
        let now = Utc::now();
        let hash = sha256_hex(token);

        let row = match self.store.token_by_access_hash(&hash).await? {
            Some(row) => row,
            None => match self.store.token_by_refresh_hash(&hash).await? {
                Some(row) => row,
                None => return Ok(IntrospectionResponse::inactive()),
            },
        };

        self.audit.record(
            AuditEvent::new(AuditKind::TokenIntrospected)
                .client(&row.agent_id)
                .token(row.id),
        )?;

        if row.revoked || row.is_expired(now) {
            return Ok(IntrospectionResponse::inactive());
        }

        Ok(IntrospectionResponse {
            active: true,
            scope: Some(row.scope.iter().cloned().collect()),
            client_id: Some(row.agent_id.clone()),
            token_id: Some(row.id),
            task_id: Some(row.task_id.clone()),
            parent_task_id: row.parent_task_id.clone(),
            parent_token_id: row.parent_token_id,
            exp: Some(row.expires_at.timestamp()),
            iat: Some(row.issued_at.timestamp()),
        })
    }

    /// Revoke a token and, by default, every descendant
    ///
    /// Never discloses whether the token existed; unknown tokens are a
    /// silent success, per RFC 7009.
    pub async fn revoke(&self, token: &str, revoke_children: bool) -> Result<()> {
        let now = Utc::now();
        let hash = sha256_hex(token);

        let row = match self.store.token_by_access_hash(&hash).await? {
            Some(row) => Some(row),
            None => self.store.token_by_refresh_hash(&hash).await?,
        };
        let Some(row) = row else {
            return Ok(());
        };

        self.store.mark_revoked(row.id, "revoked", now).await?;
        self.audit.record(
            AuditEvent::new(AuditKind::TokenRevoked)
                .client(&row.agent_id)
                .token(row.id)
                .reason("revoked"),
        )?;

        if revoke_children {
            for descendant in self.store.descendants(row.id).await? {
                self.store
                    .mark_revoked(descendant, "ancestor_revoked", now)
                    .await?;
                self.audit.record(
                    AuditEvent::new(AuditKind::TokenRevoked)
                        .token(descendant)
                        .reason("ancestor_revoked"),
                )?;
            }
        }

        Ok(())
    }

    /// Verify a token's authority by re-walking its ancestor chain
    ///
    /// A broken invariant anywhere in the chain invalidates the leaf even
    /// when the leaf record itself looks well-formed.
    pub async fn verify(&self, req: VerifyRequest) -> Result<VerificationOutcome> {
        let now = Utc::now();

        let row = self
            .store
            .token_by_access_hash(&sha256_hex(&req.token))
            .await?
            .ok_or_else(|| AuthError::InvalidGrant("unknown token".to_string()))?;

        // Signature and claim binding via the key provider
        let claims = AccessClaims::decode(&req.token, self.keys.as_ref())?;
        if claims.jti != row.id {
            return Err(AuthError::LineageInvalid(
                "token claims do not match the stored record".to_string(),
            ));
        }

        if row.revoked {
            return Err(AuthError::TokenRevoked);
        }

        let leeway = if req.allow_clock_skew {
            req.max_clock_skew_seconds
                .unwrap_or(30)
                .clamp(0, crate::MAX_CLOCK_SKEW_SECS)
        } else {
            0
        };
        if now >= row.expires_at + Duration::seconds(leeway) {
            return Err(AuthError::TokenExpired(row.expires_at));
        }

        if let Some(expected) = &req.task_id {
            if expected != &row.task_id {
                return Err(AuthError::InvalidRequest("task_id mismatch".to_string()));
            }
        }
        if let Some(expected) = &req.parent_task_id {
            if row.parent_task_id.as_ref() != Some(expected) {
                return Err(AuthError::InvalidRequest(
                    "parent_task_id mismatch".to_string(),
                ));
            }
        }
        if let Some(parent_token) = &req.parent_token {
            let parent = self
                .store
                .token_by_access_hash(&sha256_hex(parent_token))
                .await?
                .ok_or_else(|| AuthError::InvalidGrant("unknown parent token".to_string()))?;
            if row.parent_token_id != Some(parent.id) {
                return Err(AuthError::LineageInvalid(
                    "token is not a child of the supplied parent".to_string(),
                ));
            }
        }

        let chain = self.store.ancestor_chain(row.id).await?;
        for link in chain.windows(2) {
            let (parent, child) = (&link[0], &link[1]);
            if !child.inheritance.permitted_under(parent.inheritance) {
                return Err(AuthError::LineageInvalid(
                    "inheritance mode loosened within the chain".to_string(),
                ));
            }
            if child.inheritance == ScopeInheritance::Restricted
                && !self.catalog.is_subset(
                    child.scope.iter().map(String::as_str),
                    parent.scope.iter().map(String::as_str),
                )?
            {
                return Err(AuthError::LineageInvalid(
                    "scope-subset invariant broken in the ancestor chain".to_string(),
                ));
            }
        }
        for ancestor in &chain[..chain.len().saturating_sub(1)] {
            if ancestor.revoked {
                return Err(AuthError::TokenRevoked);
            }
        }

        self.audit.record(
            AuditEvent::new(AuditKind::TokenVerified)
                .client(&row.agent_id)
                .token(row.id),
        )?;

        Ok(VerificationOutcome {
            verified: true,
            token_id: row.id,
            task_id: row.task_id,
        })
    }

    async fn authenticate(&self, client_id: &str, client_secret: &str) -> Result<Agent> {
        let agent = self
            .store
            .agent(client_id)
            .await?
            .ok_or_else(|| AuthError::InvalidClient("unknown client".to_string()))?;
        if !agent.authenticate(client_secret) {
            return Err(AuthError::InvalidClient("bad client credentials".to_string()));
        }
        Ok(agent)
    }

    fn check_tier(&self, agent: &Agent, scope: &BTreeSet<String>) -> Result<()> {
        let needed = self.catalog.max_tier(scope.iter().map(String::as_str));
        if needed > agent.max_tier {
            return Err(AuthError::InsufficientScope(format!(
                "scope requires {:?} tier, client ceiling is {:?}",
                needed, agent.max_tier
            )));
        }
        Ok(())
    }

    /// Evaluate policy and audit the decision either way
    fn evaluate_policy(&self, ctx: &PolicyContext) -> Result<()> {
        let decision = self.policy.evaluate(ctx);

        let mut event = AuditEvent::new(AuditKind::PolicyDecision).client(&ctx.client_id);
        event.scope = ctx.scopes.iter().cloned().collect();
        event.task_id = ctx.task_id.clone();
        event.decision = Some(if decision.is_allow() { "allow" } else { "deny" }.to_string());
        event.reason = decision.matched.clone();
        self.audit.record(event)?;

        if !decision.is_allow() {
            return Err(AuthError::PolicyDenied {
                policy: decision.matched,
            });
        }
        Ok(())
    }

    /// Persist a new token row and sign its access token; the store
    /// re-checks parent revocation inside the same critical section that
    /// links the child
    async fn mint(&self, spec: MintSpec) -> Result<TokenResponse> {
        let now = Utc::now();
        let refresh_plain = random_opaque();

        let mut row = IssuedToken {
            id: Uuid::new_v4(),
            agent_id: spec.agent_id,
            access_token_hash: String::new(),
            refresh_token_hash: Some(sha256_hex(&refresh_plain)),
            scope: spec.scope,
            tools: spec.tools,
            task_id: spec.task_id,
            parent_task_id: spec.parent_task_id,
            parent_token_id: spec.parent_token_id,
            grant_id: spec.grant_id,
            inheritance: spec.inheritance,
            issued_at: now,
            expires_at: now + Duration::seconds(self.config.access_ttl_secs),
            refresh_expires_at: Some(now + Duration::seconds(self.config.refresh_ttl_secs)),
            revoked: false,
            revoked_at: None,
            revocation_reason: None,
            code_challenge: None,
            code_challenge_method: None,
            auth_code_hash: None,
        };
        if let Some((code_hash, challenge, method)) = spec.code {
            row.auth_code_hash = Some(code_hash);
            row.code_challenge = Some(challenge);
            row.code_challenge_method = Some(method);
        }

        let access_token = AccessClaims::for_token(&row, &self.config.issuer)
            .encode(self.keys.as_ref())?;
        row.access_token_hash = sha256_hex(&access_token);

        self.store.insert_token(row.clone()).await?;

        let mut event = AuditEvent::new(spec.audit_kind)
            .client(&row.agent_id)
            .token(row.id);
        event.parent_token_id = row.parent_token_id;
        event.task_id = Some(row.task_id.clone());
        event.parent_task_id = row.parent_task_id.clone();
        event.grant_id = row.grant_id;
        event.scope = row.scope.iter().cloned().collect();
        self.audit.record(event)?;

        Ok(TokenResponse {
            access_token,
            refresh_token: Some(refresh_plain),
            token_type: "Bearer".to_string(),
            expires_in: row.expires_in(now),
            scope: row.scope.iter().cloned().collect(),
            token_id: row.id,
            task_id: row.task_id,
        })
    }
}
