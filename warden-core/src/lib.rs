//! # warden-core: agent authorization engine
//!
//! Implements the token issuance, lineage, and policy-enforcement engine
//! behind the Warden authorization server.
//!
//! ## Features
//!
//! - **Three grant flows**: client-credentials, refresh-token, and
//!   authorization-code with PKCE
//! - **Token lineage**: every delegated (child) token is a verifiable
//!   narrowing of its parent, maintained as a cycle-free forest
//! - **Cascading revocation**: revoking a token invalidates every token
//!   transitively descended from it
//! - **ABAC policy evaluation**: prioritized allow/deny rules with
//!   explicit deny-override semantics, evaluated before every issuance
//! - **Delegation grants**: principal → agent minting authority with scope
//!   and depth bounds
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                GRANT REQUEST (/token)                │
//! └──────────────────────────────────────────────────────┘
//!                          ↓
//!          ┌─────────────────────────────────┐
//!          │   OAUTH ENGINE                  │
//!          │   resolves agent, parent token  │
//!          └─────────────────────────────────┘
//!               ↓                        ↓
//!    ┌────────────────────┐   ┌────────────────────┐
//!    │  SCOPE CATALOG     │   │  POLICY EVALUATOR  │
//!    │  expand / subset   │   │  deny-override     │
//!    └────────────────────┘   └────────────────────┘
//!               ↓                        ↓
//!          ┌─────────────────────────────────┐
//!          │   CREDENTIAL STORE              │
//!          │   lineage forest + indexes      │
//!          └─────────────────────────────────┘
//!                          ↓
//!          ┌─────────────────────────────────┐
//!          │   AUDIT SINK (append-only)      │
//!          └─────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod agent;
pub mod audit;
pub mod delegation;
pub mod error;
pub mod keys;
pub mod oauth;
pub mod policy;
pub mod scope;
pub mod store;
pub mod token;

// Re-exports for convenience
pub use agent::{Agent, AgentRegistry};
pub use audit::{AuditEvent, AuditKind, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use delegation::{
    DelegationEngine, DelegationGrant, GrantConstraints, PrincipalKind, PrincipalRef,
};
pub use error::{AuthError, ErrorKind, Result};
pub use keys::{KeyProvider, StaticKeyProvider};
pub use oauth::{OAuthConfig, OAuthEngine, TokenResponse};
pub use policy::{Decision, Effect, PolicyContext, PolicyEngine, PolicyRule, PolicySet};
pub use scope::{ScopeCatalog, ScopeDef, ScopeTier};
pub use store::{CredentialStore, MemoryStore};
pub use token::{AuthorizationCode, CodeChallengeMethod, IssuedToken, ScopeInheritance};

/// Default access-token lifetime (1 hour)
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 3_600;

/// Default refresh-token lifetime (30 days)
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 3_600;

/// Default authorization-code lifetime (10 minutes)
pub const DEFAULT_AUTH_CODE_TTL_SECS: i64 = 600;

/// Default registration-token lifetime (24 hours)
pub const DEFAULT_REGISTRATION_TTL_SECS: i64 = 24 * 3_600;

/// Maximum delegation depth to prevent infinite chains
pub const MAX_DELEGATION_DEPTH: u8 = 5;

/// Hard cap on caller-requested clock skew during verification (5 minutes)
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;
