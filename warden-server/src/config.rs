//! Server configuration
//!
//! Environment variables carry the deployment knobs; the scope catalog and
//! policy rule set come from a TOML file supplied by the policy source. The
//! file is compiled into an immutable snapshot at load; replacing the
//! snapshot is a single atomic swap.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::path::Path;
use warden_core::policy::PolicyRule;
use warden_core::scope::ScopeDef;

/// Deployment configuration, resolved from the environment
#[derive(Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub issuer: String,
    pub signing_secret: Vec<u8>,
    pub policy_file: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub code_ttl_secs: i64,
}

impl Config {
    /// Resolve configuration from the environment
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let server_port = env::var("WARDEN_SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .context("invalid WARDEN_SERVER_PORT")?;

        let signing_secret = env::var("WARDEN_SIGNING_SECRET")
            .context("WARDEN_SIGNING_SECRET must be set (hex-encoded key material)")?;
        let signing_secret =
            hex::decode(&signing_secret).context("invalid WARDEN_SIGNING_SECRET hex encoding")?;

        Ok(Self {
            server_host: env::var("WARDEN_SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port,
            issuer: env::var("WARDEN_ISSUER")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
            signing_secret,
            policy_file: env::var("WARDEN_POLICY_FILE")
                .context("WARDEN_POLICY_FILE must be set (path to the scope/policy TOML)")?,
            access_ttl_secs: ttl_from_env("WARDEN_ACCESS_TTL_SECS", 3_600)?,
            refresh_ttl_secs: ttl_from_env("WARDEN_REFRESH_TTL_SECS", 30 * 24 * 3_600)?,
            code_ttl_secs: ttl_from_env("WARDEN_CODE_TTL_SECS", 600)?,
        })
    }
}

fn ttl_from_env(name: &str, default: i64) -> anyhow::Result<i64> {
    match env::var(name) {
        Ok(value) => value.parse().with_context(|| format!("invalid {}", name)),
        Err(_) => Ok(default),
    }
}

/// The scope catalog and policy rules as authored by the policy source
#[derive(Debug, Default, Deserialize)]
pub struct PolicyFile {
    /// Scope catalog entries
    #[serde(default)]
    pub scopes: Vec<ScopeDef>,

    /// Policy rules, in the order that breaks priority ties
    #[serde(default)]
    pub policies: Vec<PolicyRule>,
}

impl PolicyFile {
    /// Load and parse the TOML policy file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read policy file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse policy file {}", path.display()))
    }
}
