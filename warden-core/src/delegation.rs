//! Delegation grants
//!
//! A delegation grant authorizes one principal (user or agent) to let a
//! specific delegate agent mint tokens on its behalf, bounded by a scope
//! ceiling, a maximum chain depth, and time/resource constraints. Revoking a
//! grant transitively invalidates every token minted under it or under any
//! grant chained beneath it.

use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::error::{AuthError, Result};
use crate::policy::{ActorKind, PolicyContext, PolicyEngine};
use crate::scope::ScopeCatalog;
use crate::store::CredentialStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Kind of principal behind a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    /// A human principal
    User,

    /// A registered agent
    Agent,
}

/// The principal a grant delegates on behalf of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRef {
    /// User or agent
    pub kind: PrincipalKind,

    /// User id or agent client id
    pub id: String,
}

/// Time and resource constraints on a grant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrantConstraints {
    /// Issuance permitted no earlier than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    /// Issuance permitted strictly before this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,

    /// Tools issuable under the grant; empty means unconstrained
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
}

impl GrantConstraints {
    fn window_contains(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map_or(true, |start| now >= start)
            && self.not_after.map_or(true, |end| now < end)
    }
}

/// Explicit authorization for a delegate agent to mint tokens on behalf of
/// a principal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationGrant {
    /// Grant identifier
    pub id: Uuid,

    /// Principal the delegate acts on behalf of
    pub principal: PrincipalRef,

    /// The agent allowed to mint under this grant
    pub delegate_id: String,

    /// Scope ceiling for tokens minted under the grant
    pub scope: BTreeSet<String>,

    /// Maximum delegation chain depth rooted at this grant
    pub max_depth: u8,

    /// Time/resource constraints
    pub constraints: GrantConstraints,

    /// Parent grant when this grant was chained beneath another
    pub parent_grant_id: Option<Uuid>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Expiry timestamp, when bounded
    pub expires_at: Option<DateTime<Utc>>,

    /// Revocation state
    pub revoked: bool,

    /// When the grant was revoked
    pub revoked_at: Option<DateTime<Utc>>,
}

impl DelegationGrant {
    /// Whether the grant may currently authorize issuance
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked
            && self.expires_at.map_or(true, |deadline| now < deadline)
            && self.constraints.window_contains(now)
    }
}

/// Request to create a grant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGrantRequest {
    /// Principal delegating authority
    pub principal: PrincipalRef,

    /// Delegate agent's client id
    pub delegate_id: String,

    /// Scope ceiling
    pub scope: Vec<String>,

    /// Maximum chain depth
    pub max_depth: u8,

    /// Constraints
    #[serde(default)]
    pub constraints: GrantConstraints,

    /// Chain beneath an existing grant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_grant_id: Option<Uuid>,

    /// Expiry, when bounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Manages grant creation, issuance validation, and cascading revocation
#[derive(Clone)]
pub struct DelegationEngine {
    store: Arc<dyn CredentialStore>,
    catalog: Arc<ScopeCatalog>,
    policy: Arc<PolicyEngine>,
    audit: Arc<dyn AuditSink>,
}

impl DelegationEngine {
    /// Create an engine over the shared components
    pub fn new(
        store: Arc<dyn CredentialStore>,
        catalog: Arc<ScopeCatalog>,
        policy: Arc<PolicyEngine>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            catalog,
            policy,
            audit,
        }
    }

    /// Create a grant after validating delegate, principal authority,
    /// chaining bounds, and policy
    pub async fn create_grant(&self, req: CreateGrantRequest) -> Result<DelegationGrant> {
        let now = Utc::now();

        if req.max_depth == 0 || req.max_depth > crate::MAX_DELEGATION_DEPTH {
            return Err(AuthError::InvalidRequest(format!(
                "max_depth must be between 1 and {}",
                crate::MAX_DELEGATION_DEPTH
            )));
        }

        let delegate = self
            .store
            .agent(&req.delegate_id)
            .await?
            .ok_or_else(|| AuthError::InvalidRequest("unknown delegate agent".to_string()))?;
        if !delegate.active {
            return Err(AuthError::InvalidRequest("delegate agent is inactive".to_string()));
        }

        let scope = self
            .catalog
            .expand(req.scope.iter().map(String::as_str))?;

        // A principal cannot grant what it does not hold. Agent principals
        // are checked against their own tier ceiling; user principals are
        // vouched for by the upstream identity layer.
        if req.principal.kind == PrincipalKind::Agent {
            let principal_agent = self
                .store
                .agent(&req.principal.id)
                .await?
                .ok_or_else(|| AuthError::InvalidRequest("unknown principal agent".to_string()))?;
            let needed = self.catalog.max_tier(scope.iter().map(String::as_str));
            if needed > principal_agent.max_tier {
                return Err(AuthError::InsufficientScope(format!(
                    "principal '{}' cannot grant {:?}-tier scope",
                    req.principal.id, needed
                )));
            }
        }

        if let Some(parent_id) = req.parent_grant_id {
            let parent = self
                .store
                .grant(parent_id)
                .await?
                .ok_or_else(|| AuthError::InvalidGrant("unknown parent grant".to_string()))?;
            if !parent.is_active(now) {
                return Err(AuthError::InvalidGrant("parent grant is not active".to_string()));
            }
            if !scope.is_subset(&self.catalog.expand(parent.scope.iter().map(String::as_str))?) {
                return Err(AuthError::InsufficientScope(
                    "chained grant scope exceeds parent grant".to_string(),
                ));
            }
            if req.max_depth >= parent.max_depth {
                return Err(AuthError::DepthExceeded {
                    current: req.max_depth,
                    max: parent.max_depth.saturating_sub(1),
                });
            }
        }

        let mut ctx = PolicyContext::for_agent("delegation:create", &req.delegate_id, now);
        ctx.actor_kind = match req.principal.kind {
            PrincipalKind::User => ActorKind::User,
            PrincipalKind::Agent => ActorKind::Agent,
        };
        ctx.scopes = scope.clone();
        ctx.tools = req.constraints.allowed_tools.clone();
        let decision = self.policy.evaluate(&ctx);
        if !decision.is_allow() {
            return Err(AuthError::PolicyDenied {
                policy: decision.matched,
            });
        }

        let grant = DelegationGrant {
            id: Uuid::new_v4(),
            principal: req.principal,
            delegate_id: req.delegate_id,
            scope,
            max_depth: req.max_depth,
            constraints: req.constraints,
            parent_grant_id: req.parent_grant_id,
            created_at: now,
            expires_at: req.expires_at,
            revoked: false,
            revoked_at: None,
        };
        self.store.insert_grant(grant.clone()).await?;

        let mut event = AuditEvent::new(AuditKind::GrantCreated).client(&grant.delegate_id);
        event.grant_id = Some(grant.id);
        event.scope = grant.scope.iter().cloned().collect();
        self.audit.record(event)?;

        Ok(grant)
    }

    /// Validate a token issuance against a grant
    pub fn validate_for_issuance(
        &self,
        grant: &DelegationGrant,
        requested: &BTreeSet<String>,
        tools: &[String],
        current_depth: u8,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if grant.revoked {
            return Err(AuthError::InvalidGrant("delegation grant revoked".to_string()));
        }
        if !grant.is_active(now) {
            return Err(AuthError::InvalidGrant(
                "delegation grant expired or outside its window".to_string(),
            ));
        }

        if current_depth >= grant.max_depth {
            return Err(AuthError::DepthExceeded {
                current: current_depth,
                max: grant.max_depth,
            });
        }

        let ceiling = self
            .catalog
            .expand(grant.scope.iter().map(String::as_str))?;
        if !requested.is_subset(&ceiling) {
            return Err(AuthError::InsufficientScope(
                "requested scope exceeds delegation grant".to_string(),
            ));
        }

        if !grant.constraints.allowed_tools.is_empty() {
            for tool in tools {
                if !grant.constraints.allowed_tools.contains(tool) {
                    return Err(AuthError::InsufficientScope(format!(
                        "tool '{}' not permitted by delegation grant",
                        tool
                    )));
                }
            }
        }

        Ok(())
    }

    /// Fetch a grant
    pub async fn get(&self, id: Uuid) -> Result<Option<DelegationGrant>> {
        self.store.grant(id).await
    }

    /// List all grants
    pub async fn list(&self) -> Result<Vec<DelegationGrant>> {
        self.store.list_grants().await
    }

    /// Revoke a grant and cascade over chained grants and every token
    /// minted under the subtree
    pub async fn revoke(&self, grant_id: Uuid) -> Result<()> {
        if self.store.grant(grant_id).await?.is_none() {
            return Err(AuthError::InvalidGrant("unknown delegation grant".to_string()));
        }

        let now = Utc::now();

        // Collect the grant subtree breadth-first
        let mut subtree = vec![grant_id];
        let mut frontier = vec![grant_id];
        while let Some(current) = frontier.pop() {
            for child in self.store.child_grants(current).await? {
                subtree.push(child);
                frontier.push(child);
            }
        }

        for id in subtree {
            self.store.mark_grant_revoked(id, now).await?;

            let mut event = AuditEvent::new(AuditKind::GrantRevoked);
            event.grant_id = Some(id);
            if id != grant_id {
                event.reason = Some("ancestor_grant_revoked".to_string());
            }
            self.audit.record(event)?;

            for token_id in self.store.tokens_under_grant(id).await? {
                self.revoke_token_tree(token_id, now).await?;
            }
        }

        Ok(())
    }

    /// Revoke one token and its descendants, auditing each step so the
    /// cascade is reconstructable
    async fn revoke_token_tree(&self, token_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        self.store
            .mark_revoked(token_id, "grant_revoked", now)
            .await?;
        self.audit.record(
            AuditEvent::new(AuditKind::TokenRevoked)
                .token(token_id)
                .reason("grant_revoked"),
        )?;

        for descendant in self.store.descendants(token_id).await? {
            self.store
                .mark_revoked(descendant, "ancestor_revoked", now)
                .await?;
            self.audit.record(
                AuditEvent::new(AuditKind::TokenRevoked)
                    .token(descendant)
                    .reason("ancestor_revoked"),
            )?;
        }
        Ok(())
    }
}
