//! Agent identity and onboarding
//!
//! Agents are registered client identities. A fresh registration is inactive
//! and holds a one-time, time-boxed registration token; presenting that token
//! activates the agent and sets its client secret. Agents are never
//! hard-deleted, only deactivated, so audit references stay resolvable.

use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::error::{AuthError, Result};
use crate::scope::ScopeTier;
use crate::store::CredentialStore;
use crate::token::{random_opaque, sha256_hex};
use crate::DEFAULT_REGISTRATION_TTL_SECS;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A registered client identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique client identifier
    pub client_id: String,

    /// SHA-256 hex of the client secret; empty until activation
    pub secret_hash: String,

    /// Human-readable name
    pub name: String,

    /// Maximum permissible scope sensitivity tier
    pub max_tier: ScopeTier,

    /// Whether the agent may authenticate
    pub active: bool,

    /// SHA-256 hex of the one-time registration token
    pub registration_token_hash: Option<String>,

    /// Registration token expiry
    pub registration_expires_at: Option<DateTime<Utc>>,

    /// Registration timestamp
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Check a presented client secret; inactive agents never authenticate
    pub fn authenticate(&self, client_secret: &str) -> bool {
        self.active && !self.secret_hash.is_empty() && sha256_hex(client_secret) == self.secret_hash
    }
}

/// Result of registering an agent; the registration token appears here once
/// and is stored only as a hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    /// Assigned client identifier
    pub client_id: String,

    /// One-time activation credential
    pub registration_token: String,

    /// Activation deadline
    pub expires_at: DateTime<Utc>,
}

/// Result of activating an agent; the client secret appears here once and is
/// stored only as a hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivatedAgent {
    /// Client identifier
    pub client_id: String,

    /// Newly minted client secret
    pub client_secret: String,
}

/// Onboarding operations over the credential store
#[derive(Clone)]
pub struct AgentRegistry {
    store: Arc<dyn CredentialStore>,
    audit: Arc<dyn AuditSink>,
}

impl AgentRegistry {
    /// Create a registry over a store and audit sink
    pub fn new(store: Arc<dyn CredentialStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Register a new agent, returning its one-time registration token
    pub async fn register(&self, name: &str, max_tier: ScopeTier) -> Result<AgentRegistration> {
        if name.is_empty() {
            return Err(AuthError::InvalidRequest("agent name is required".to_string()));
        }

        let now = Utc::now();
        let client_id = format!("agent-{}", Uuid::new_v4().simple());
        let registration_token = random_opaque();
        let expires_at = now + Duration::seconds(DEFAULT_REGISTRATION_TTL_SECS);

        let agent = Agent {
            client_id: client_id.clone(),
            secret_hash: String::new(),
            name: name.to_string(),
            max_tier,
            active: false,
            registration_token_hash: Some(sha256_hex(&registration_token)),
            registration_expires_at: Some(expires_at),
            created_at: now,
        };
        self.store.put_agent(agent).await?;

        self.audit
            .record(AuditEvent::new(AuditKind::AgentRegistered).client(&client_id))?;

        Ok(AgentRegistration {
            client_id,
            registration_token,
            expires_at,
        })
    }

    /// Exchange a registration token for a client secret, exactly once
    pub async fn activate(
        &self,
        client_id: &str,
        registration_token: &str,
    ) -> Result<ActivatedAgent> {
        let mut agent = self
            .store
            .agent(client_id)
            .await?
            .ok_or_else(|| AuthError::InvalidClient("unknown client".to_string()))?;

        let token_hash = agent
            .registration_token_hash
            .as_deref()
            .ok_or_else(|| AuthError::InvalidClient("no pending registration".to_string()))?;

        if sha256_hex(registration_token) != token_hash {
            return Err(AuthError::InvalidClient("bad registration token".to_string()));
        }

        let now = Utc::now();
        if agent
            .registration_expires_at
            .map_or(true, |deadline| now >= deadline)
        {
            return Err(AuthError::InvalidClient(
                "registration token expired".to_string(),
            ));
        }

        let client_secret = random_opaque();
        agent.secret_hash = sha256_hex(&client_secret);
        agent.active = true;
        agent.registration_token_hash = None;
        agent.registration_expires_at = None;
        self.store.update_agent(agent).await?;

        self.audit
            .record(AuditEvent::new(AuditKind::AgentActivated).client(client_id))?;

        Ok(ActivatedAgent {
            client_id: client_id.to_string(),
            client_secret,
        })
    }

    /// Deactivate an agent; the record is retained for audit integrity
    pub async fn deactivate(&self, client_id: &str) -> Result<()> {
        let mut agent = self
            .store
            .agent(client_id)
            .await?
            .ok_or_else(|| AuthError::InvalidClient("unknown client".to_string()))?;
        agent.active = false;
        self.store.update_agent(agent).await
    }
}
