//! Credential Store
//!
//! The durable repository of agents, issued tokens, authorization codes, and
//! delegation grants, with lineage-aware queries. Lineage is maintained as
//! explicit parent pointers plus a parent → children secondary index, so
//! ancestor walks and revocation cascades are index traversals, never
//! reachability over live object references.

use crate::agent::Agent;
use crate::delegation::DelegationGrant;
use crate::error::{AuthError, Result};
use crate::token::{AuthorizationCode, IssuedToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Persistence contract the engine runs over
///
/// Implementations must make `insert_token` (with its parent re-check),
/// `consume_refresh_token`, and `consume_code` atomic with respect to
/// concurrent callers; everything else is plain keyed access.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a newly registered agent; the client id must be unused
    async fn put_agent(&self, agent: Agent) -> Result<()>;

    /// Fetch an agent by client id
    async fn agent(&self, client_id: &str) -> Result<Option<Agent>>;

    /// Replace an existing agent record
    async fn update_agent(&self, agent: Agent) -> Result<()>;

    /// Persist a new token row, linking it into the lineage forest
    ///
    /// Atomically re-checks that the parent (when set) exists, is not
    /// revoked, and that the link closes no cycle. Issuing a child of a
    /// parent that is concurrently being revoked must fail here, not in a
    /// separate pre-check.
    async fn insert_token(&self, token: IssuedToken) -> Result<()>;

    /// Fetch a token by id
    async fn token(&self, id: Uuid) -> Result<Option<IssuedToken>>;

    /// Fetch a token by access-token hash
    async fn token_by_access_hash(&self, hash: &str) -> Result<Option<IssuedToken>>;

    /// Fetch a token by refresh-token hash; consumed refresh material does
    /// not resolve
    async fn token_by_refresh_hash(&self, hash: &str) -> Result<Option<IssuedToken>>;

    /// Atomically invalidate a refresh token and return its row
    ///
    /// Exactly-once: a concurrent or repeated call for the same hash gets
    /// `invalid_grant`. Revoked or expired refresh material is rejected
    /// without being consumed.
    async fn consume_refresh_token(&self, hash: &str, at: DateTime<Utc>) -> Result<IssuedToken>;

    /// Transition a token to revoked; idempotent, first reason wins
    async fn mark_revoked(&self, id: Uuid, reason: &str, at: DateTime<Utc>) -> Result<()>;

    /// Every token whose parent chain passes through `id`, by index traversal
    async fn descendants(&self, id: Uuid) -> Result<Vec<Uuid>>;

    /// The token's chain from root to `id` inclusive
    async fn ancestor_chain(&self, id: Uuid) -> Result<Vec<IssuedToken>>;

    /// Tokens minted under a delegation grant
    async fn tokens_under_grant(&self, grant_id: Uuid) -> Result<Vec<Uuid>>;

    /// Persist an authorization code
    async fn insert_code(&self, code: AuthorizationCode) -> Result<()>;

    /// Fetch a code by hash without consuming it
    async fn code_by_hash(&self, code_hash: &str) -> Result<Option<AuthorizationCode>>;

    /// Atomically consume a code, exactly once
    ///
    /// Concurrent exchanges of the same code produce one success; every
    /// other caller gets `invalid_grant`. Expired codes are rejected.
    async fn consume_code(&self, code_hash: &str, at: DateTime<Utc>) -> Result<AuthorizationCode>;

    /// Persist a delegation grant
    async fn insert_grant(&self, grant: DelegationGrant) -> Result<()>;

    /// Fetch a grant by id
    async fn grant(&self, id: Uuid) -> Result<Option<DelegationGrant>>;

    /// All grants, newest first
    async fn list_grants(&self) -> Result<Vec<DelegationGrant>>;

    /// Transition a grant to revoked; idempotent
    async fn mark_grant_revoked(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Grants chained directly beneath `id`
    async fn child_grants(&self, id: Uuid) -> Result<Vec<Uuid>>;
}

#[derive(Default)]
struct StoreInner {
    agents: HashMap<String, Agent>,
    tokens: HashMap<Uuid, IssuedToken>,
    children: HashMap<Uuid, Vec<Uuid>>,
    access_index: HashMap<String, Uuid>,
    refresh_index: HashMap<String, Uuid>,
    codes: HashMap<Uuid, AuthorizationCode>,
    code_index: HashMap<String, Uuid>,
    grants: HashMap<Uuid, DelegationGrant>,
    grant_children: HashMap<Uuid, Vec<Uuid>>,
    grant_tokens: HashMap<Uuid, Vec<Uuid>>,
}

impl StoreInner {
    /// Walk the parent chain upward from `start`, guarding against
    /// corrupted data that loops
    fn walk_ancestors(&self, start: Uuid) -> Vec<Uuid> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if !seen.insert(id) {
                break;
            }
            chain.push(id);
            current = self.tokens.get(&id).and_then(|t| t.parent_token_id);
        }
        chain
    }
}

/// In-process credential store
///
/// One mutex over the whole arena: every multi-step invariant check runs
/// inside a single critical section, which is what provides the atomicity
/// the contract demands.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn put_agent(&self, agent: Agent) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.agents.contains_key(&agent.client_id) {
            return Err(AuthError::InvalidRequest(format!(
                "client_id '{}' already registered",
                agent.client_id
            )));
        }
        inner.agents.insert(agent.client_id.clone(), agent);
        Ok(())
    }

    async fn agent(&self, client_id: &str) -> Result<Option<Agent>> {
        let inner = self.inner.lock().await;
        Ok(inner.agents.get(client_id).cloned())
    }

    async fn update_agent(&self, agent: Agent) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.agents.contains_key(&agent.client_id) {
            return Err(AuthError::Storage(format!(
                "unknown agent '{}'",
                agent.client_id
            )));
        }
        inner.agents.insert(agent.client_id.clone(), agent);
        Ok(())
    }

    async fn insert_token(&self, token: IssuedToken) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if inner.tokens.contains_key(&token.id) {
            return Err(AuthError::Storage(format!("duplicate token id {}", token.id)));
        }

        if let Some(parent_id) = token.parent_token_id {
            let parent = inner
                .tokens
                .get(&parent_id)
                .ok_or_else(|| AuthError::InvalidGrant("unknown parent token".to_string()))?;
            if parent.revoked {
                return Err(AuthError::TokenRevoked);
            }
            // Linking to a token already in the candidate's own ancestor
            // chain would close a cycle
            if inner.walk_ancestors(parent_id).contains(&token.id) {
                return Err(AuthError::LineageInvalid(
                    "token link would create a lineage cycle".to_string(),
                ));
            }
            inner.children.entry(parent_id).or_default().push(token.id);
        }

        if let Some(grant_id) = token.grant_id {
            inner.grant_tokens.entry(grant_id).or_default().push(token.id);
        }

        inner
            .access_index
            .insert(token.access_token_hash.clone(), token.id);
        if let Some(refresh_hash) = &token.refresh_token_hash {
            inner.refresh_index.insert(refresh_hash.clone(), token.id);
        }
        inner.tokens.insert(token.id, token);
        Ok(())
    }

    async fn token(&self, id: Uuid) -> Result<Option<IssuedToken>> {
        let inner = self.inner.lock().await;
        Ok(inner.tokens.get(&id).cloned())
    }

    async fn token_by_access_hash(&self, hash: &str) -> Result<Option<IssuedToken>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .access_index
            .get(hash)
            .and_then(|id| inner.tokens.get(id))
            .cloned())
    }

    async fn token_by_refresh_hash(&self, hash: &str) -> Result<Option<IssuedToken>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .refresh_index
            .get(hash)
            .and_then(|id| inner.tokens.get(id))
            .cloned())
    }

    async fn consume_refresh_token(&self, hash: &str, at: DateTime<Utc>) -> Result<IssuedToken> {
        let mut inner = self.inner.lock().await;

        let id = *inner
            .refresh_index
            .get(hash)
            .ok_or_else(|| AuthError::InvalidGrant("unknown or already used refresh token".to_string()))?;
        let token = inner
            .tokens
            .get(&id)
            .ok_or_else(|| AuthError::Storage("refresh index points at missing token".to_string()))?;

        if token.revoked {
            return Err(AuthError::InvalidGrant("refresh token revoked".to_string()));
        }
        if token.refresh_expires_at.map_or(false, |deadline| at >= deadline) {
            return Err(AuthError::InvalidGrant("refresh token expired".to_string()));
        }

        let token = token.clone();
        inner.refresh_index.remove(hash);
        Ok(token)
    }

    async fn mark_revoked(&self, id: Uuid, reason: &str, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let token = inner
            .tokens
            .get_mut(&id)
            .ok_or_else(|| AuthError::Storage(format!("unknown token {}", id)))?;
        if !token.revoked {
            token.revoked = true;
            token.revoked_at = Some(at);
            token.revocation_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn descendants(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().await;
        let mut result = Vec::new();
        let mut frontier = vec![id];
        let mut seen = HashSet::from([id]);
        while let Some(current) = frontier.pop() {
            if let Some(children) = inner.children.get(&current) {
                for &child in children {
                    if seen.insert(child) {
                        result.push(child);
                        frontier.push(child);
                    }
                }
            }
        }
        Ok(result)
    }

    async fn ancestor_chain(&self, id: Uuid) -> Result<Vec<IssuedToken>> {
        let inner = self.inner.lock().await;
        if !inner.tokens.contains_key(&id) {
            return Err(AuthError::Storage(format!("unknown token {}", id)));
        }
        let mut chain: Vec<IssuedToken> = inner
            .walk_ancestors(id)
            .into_iter()
            .filter_map(|ancestor| inner.tokens.get(&ancestor).cloned())
            .collect();
        chain.reverse();
        Ok(chain)
    }

    async fn tokens_under_grant(&self, grant_id: Uuid) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().await;
        Ok(inner.grant_tokens.get(&grant_id).cloned().unwrap_or_default())
    }

    async fn insert_code(&self, code: AuthorizationCode) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.code_index.contains_key(&code.code_hash) {
            return Err(AuthError::Storage("duplicate authorization code".to_string()));
        }
        inner.code_index.insert(code.code_hash.clone(), code.id);
        inner.codes.insert(code.id, code);
        Ok(())
    }

    async fn code_by_hash(&self, code_hash: &str) -> Result<Option<AuthorizationCode>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .code_index
            .get(code_hash)
            .and_then(|id| inner.codes.get(id))
            .cloned())
    }

    async fn consume_code(&self, code_hash: &str, at: DateTime<Utc>) -> Result<AuthorizationCode> {
        let mut inner = self.inner.lock().await;

        let id = *inner
            .code_index
            .get(code_hash)
            .ok_or_else(|| AuthError::InvalidGrant("unknown authorization code".to_string()))?;
        let code = inner
            .codes
            .get_mut(&id)
            .ok_or_else(|| AuthError::Storage("code index points at missing code".to_string()))?;

        if code.consumed_at.is_some() {
            return Err(AuthError::InvalidGrant(
                "authorization code already used".to_string(),
            ));
        }
        if code.is_expired(at) {
            return Err(AuthError::InvalidGrant("authorization code expired".to_string()));
        }

        code.consumed_at = Some(at);
        Ok(code.clone())
    }

    async fn insert_grant(&self, grant: DelegationGrant) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.grants.contains_key(&grant.id) {
            return Err(AuthError::Storage(format!("duplicate grant id {}", grant.id)));
        }
        if let Some(parent_id) = grant.parent_grant_id {
            inner.grant_children.entry(parent_id).or_default().push(grant.id);
        }
        inner.grants.insert(grant.id, grant);
        Ok(())
    }

    async fn grant(&self, id: Uuid) -> Result<Option<DelegationGrant>> {
        let inner = self.inner.lock().await;
        Ok(inner.grants.get(&id).cloned())
    }

    async fn list_grants(&self) -> Result<Vec<DelegationGrant>> {
        let inner = self.inner.lock().await;
        let mut grants: Vec<DelegationGrant> = inner.grants.values().cloned().collect();
        grants.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(grants)
    }

    async fn mark_grant_revoked(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let grant = inner
            .grants
            .get_mut(&id)
            .ok_or_else(|| AuthError::Storage(format!("unknown grant {}", id)))?;
        if !grant.revoked {
            grant.revoked = true;
            grant.revoked_at = Some(at);
        }
        Ok(())
    }

    async fn child_grants(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().await;
        Ok(inner.grant_children.get(&id).cloned().unwrap_or_default())
    }
}
