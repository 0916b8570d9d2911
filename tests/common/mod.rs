//! Common test utilities shared across end-to-end tests

use std::sync::Arc;
use warden_core::agent::AgentRegistry;
use warden_core::audit::MemoryAuditSink;
use warden_core::delegation::DelegationEngine;
use warden_core::keys::StaticKeyProvider;
use warden_core::oauth::{ClientCredentialsRequest, OAuthConfig, OAuthEngine};
use warden_core::policy::{Condition, Effect, Pattern, PolicyEngine, PolicyRule, PolicySet};
use warden_core::scope::{ScopeCatalog, ScopeDef, ScopeTier};
use warden_core::store::{CredentialStore, MemoryStore};
use warden_core::token::ScopeInheritance;

/// A fully wired engine stack over an in-process store, with one activated
/// agent ready to request tokens
pub struct TestAuth {
    pub engine: OAuthEngine,
    pub registry: AgentRegistry,
    pub store: Arc<MemoryStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub client_id: String,
    pub client_secret: String,
}

/// Catalog used by every scenario: flat scopes plus one implication chain
pub fn test_scopes() -> Vec<ScopeDef> {
    vec![
        ScopeDef::new("read:a", "a", ScopeTier::ReadOnly),
        ScopeDef::new("write:b", "b", ScopeTier::Standard),
        ScopeDef::new("admin:c", "c", ScopeTier::Admin),
        ScopeDef::new("read:files", "files", ScopeTier::ReadOnly),
        ScopeDef::new("write:files", "files", ScopeTier::Standard).implies(["read:files"]),
        ScopeDef::new("forbidden:x", "x", ScopeTier::Standard),
    ]
}

/// Allow everything except `forbidden:*`, which a higher-priority deny kills
pub fn test_policies() -> Vec<PolicyRule> {
    vec![
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
    ]
}

/// Build the stack and onboard one Admin-tier agent through the real
/// registration/activation path
pub async fn test_auth() -> TestAuth {
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn CredentialStore> = store.clone();
    let catalog = Arc::new(ScopeCatalog::new(test_scopes()).expect("catalog"));
    let policy = Arc::new(PolicyEngine::new(PolicySet::compile(test_policies())));
    let audit = Arc::new(MemoryAuditSink::new());
    let keys = Arc::new(StaticKeyProvider::hs256(b"e2e-test-secret"));

    let delegation = DelegationEngine::new(
        store_dyn.clone(),
        catalog.clone(),
        policy.clone(),
        audit.clone(),
    );
    let registry = AgentRegistry::new(store_dyn.clone(), audit.clone());
    let engine = OAuthEngine::new(
        store_dyn,
        catalog,
        policy,
        delegation,
        keys,
        audit.clone(),
        OAuthConfig::default(),
    );

    let registration = registry
        .register("e2e-agent", ScopeTier::Admin)
        .await
        .expect("register");
    let activated = registry
        .activate(&registration.client_id, &registration.registration_token)
        .await
        .expect("activate");

    TestAuth {
        engine,
        registry,
        store,
        audit,
        client_id: activated.client_id,
        client_secret: activated.client_secret,
    }
}

impl TestAuth {
    /// A client-credentials request from the onboarded agent
    pub fn request(&self, scope: &[&str]) -> ClientCredentialsRequest {
        ClientCredentialsRequest {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            scope: scope.iter().map(|s| s.to_string()).collect(),
            tools: vec![],
            task_id: None,
            parent_task_id: None,
            parent_token: None,
            grant_id: None,
            scope_inheritance: ScopeInheritance::Restricted,
            tenant_id: None,
        }
    }
}
