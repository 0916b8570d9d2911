//! Warden authorization server
//!
//! OAuth 2.1-style token issuance for autonomous agents: three grant flows,
//! lineage-aware delegation with cascading revocation, and ABAC policy
//! enforcement in front of every issuance.

mod config;
mod error;
mod routes;
mod state;

use actix_web::{middleware, web, App, HttpServer};
use config::{Config, PolicyFile};
use state::AppState;
use std::sync::Arc;
use tracing::info;
use warden_core::audit::TracingAuditSink;
use warden_core::oauth::OAuthConfig;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting Warden authorization server...");

    let config = Config::from_env()?;
    info!("Configuration loaded");

    let policy_file = PolicyFile::load(&config.policy_file)?;
    info!(
        scopes = policy_file.scopes.len(),
        policies = policy_file.policies.len(),
        "Policy snapshot compiled"
    );

    let app_state = AppState::build(
        policy_file.scopes,
        policy_file.policies,
        &config.signing_secret,
        OAuthConfig {
            issuer: config.issuer.clone(),
            access_ttl_secs: config.access_ttl_secs,
            refresh_ttl_secs: config.refresh_ttl_secs,
            code_ttl_secs: config.code_ttl_secs,
        },
        Arc::new(TracingAuditSink),
    )?;
    info!("Engines initialized");

    let bind_addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting server on {}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .service(routes::token::token)
            .service(routes::authorize::authorize)
            .service(routes::introspect::introspect)
            .service(routes::revoke::revoke)
            .service(routes::verify::verify)
            .service(routes::delegations::create_delegation)
            .service(routes::delegations::list_delegations)
            .service(routes::delegations::get_delegation)
            .service(routes::delegations::revoke_delegation)
            .service(routes::agents::register_agent)
            .service(routes::agents::activate_agent)
            .service(routes::health::health_check)
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    Ok(())
}
