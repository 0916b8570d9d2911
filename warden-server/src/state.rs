//! Shared application state
//!
//! All engines are constructed once at process start and passed into
//! handlers by reference; there is no lazily initialized global state, so
//! every test can assemble its own isolated instance.

use std::sync::Arc;
use warden_core::agent::AgentRegistry;
use warden_core::audit::AuditSink;
use warden_core::delegation::DelegationEngine;
use warden_core::keys::StaticKeyProvider;
use warden_core::oauth::{OAuthConfig, OAuthEngine};
use warden_core::policy::{PolicyEngine, PolicyRule, PolicySet};
use warden_core::scope::{ScopeCatalog, ScopeDef};
use warden_core::store::{CredentialStore, MemoryStore};

/// Handler-visible state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<OAuthEngine>,
    pub registry: AgentRegistry,
    pub store: Arc<dyn CredentialStore>,
}

impl AppState {
    /// Assemble the engine stack over a fresh in-process store
    pub fn build(
        scopes: Vec<ScopeDef>,
        policies: Vec<PolicyRule>,
        signing_secret: &[u8],
        oauth: OAuthConfig,
        audit: Arc<dyn AuditSink>,
    ) -> anyhow::Result<Self> {
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());
        let catalog = Arc::new(ScopeCatalog::new(scopes)?);
        let policy = Arc::new(PolicyEngine::new(PolicySet::compile(policies)));
        let keys = Arc::new(StaticKeyProvider::hs256(signing_secret));

        let delegation = DelegationEngine::new(
            store.clone(),
            catalog.clone(),
            policy.clone(),
            audit.clone(),
        );
        let registry = AgentRegistry::new(store.clone(), audit.clone());
        let engine = OAuthEngine::new(
            store.clone(),
            catalog,
            policy,
            delegation,
            keys,
            audit,
            oauth,
        );

        Ok(Self {
            engine: Arc::new(engine),
            registry,
            store,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use warden_core::audit::MemoryAuditSink;
    use warden_core::policy::{Condition, Effect, Pattern};
    use warden_core::scope::ScopeTier;
    use warden_core::token::sha256_hex;

    /// A state with a small catalog, an allow-by-default policy plus a deny
    /// on `forbidden:*`, and one activated agent (`agent-1` / `agent-secret`)
    pub async fn test_state() -> AppState {
        let scopes = vec![
            ScopeDef::new("read:a", "a", ScopeTier::ReadOnly),
            ScopeDef::new("write:b", "b", ScopeTier::Standard),
            ScopeDef::new("admin:c", "c", ScopeTier::Admin),
            ScopeDef::new("forbidden:x", "x", ScopeTier::Standard),
        ];
        let policies = vec![
            PolicyRule {
                name: "allow-agents".to_string(),
                priority: 10,
                effect: Effect::Allow,
                actions: vec![],
                scope_pattern: None,
                resource_pattern: None,
                condition: Condition::True,
            },
            PolicyRule {
                name: "deny-forbidden".to_string(),
                priority: 20,
                effect: Effect::Deny,
                actions: vec![],
                scope_pattern: Some(Pattern::new("forbidden:*")),
                resource_pattern: None,
                condition: Condition::True,
            },
        ];

        let state = AppState::build(
            scopes,
            policies,
            b"handler-test-secret",
            OAuthConfig::default(),
            Arc::new(MemoryAuditSink::new()),
        )
        .expect("test state");

        seed_agent(&state, "agent-1", "agent-secret").await;
        state
    }

    pub async fn seed_agent(state: &AppState, client_id: &str, secret: &str) {
        state
            .store
            .put_agent(warden_core::agent::Agent {
                client_id: client_id.to_string(),
                secret_hash: sha256_hex(secret),
                name: client_id.to_string(),
                max_tier: ScopeTier::Admin,
                active: true,
                registration_token_hash: None,
                registration_expires_at: None,
                created_at: chrono::Utc::now(),
            })
            .await
            .expect("seed agent");
    }
}
