//! Wires every singleton service into a running [`AppState`]: one function
//! that opens the database, builds each repository/manager, and returns a
//! bundle the router and background subsystems are built from.

use std::sync::Arc;

use audit::{AuditBuffer, AuditBufferConfig, RepositorySink};
use gateway::repository::sqlite::{CredentialRowAdapter, Repository as GatewayRepository};
use gateway::service::GatewayService;
use gateway::{CatalogReloader, KillSwitchRegistry, SharedMcpManager, ToolRouter, UserPoolConfig};
use identity::rate_limiter::{RateLimiter, RateLimiterConfig};
use identity::repository::sqlite::Repository as IdentityRepository;
use identity::service::IdentityService;
use identity::session::SessionSecret;
use identity::{AdminKeyManager, ApiKeyAuthenticator};
use shared::error::CommonError;
use shared::libsql::{self, Connection};
use tracing::warn;
use vault::CredentialVault;

use crate::config::AppConfig;

/// Everything the router and the background subsystems need to run.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub identity: IdentityService,
    pub gateway: GatewayService,
}

/// The merged migration set every entry point needs: one for the real
/// on-disk database in `main.rs`, one for the in-memory database
/// integration tests build via `shared::test_utils::setup_in_memory_database`.
pub fn merged_migrations() -> libsql::Migrations<'static> {
    libsql::merge_nested_migrations(vec![
        identity::load_sql_migrations(),
        gateway::load_sql_migrations(),
        audit::load_sql_migrations(),
    ])
}

/// Opens (and migrates) the database, constructs every repository and
/// service, and brings the shared MCP pool in sync with whatever is already
/// published in the catalog. Does not start the HTTP listener; that's
/// `subsystems::spawn_server`'s job.
pub async fn build_app_state(config: AppConfig) -> Result<AppState, CommonError> {
    let db_url = config.db_url()?;
    let (_db, conn) = libsql::establish_db_connection(&db_url, Some(merged_migrations())).await?;
    build_app_state_with_connection(config, conn).await
}

/// Builds the same bundle as [`build_app_state`] from an already-open,
/// already-migrated connection. The seam integration tests use to swap in
/// `shared::test_utils::setup_in_memory_database`'s in-memory database.
pub async fn build_app_state_with_connection(config: AppConfig, conn: Connection) -> Result<AppState, CommonError> {
    let identity = build_identity_service(&config, conn.clone())?;
    let gateway = build_gateway_service(&config, conn, &identity).await?;

    Ok(AppState { config, identity, gateway })
}

fn build_identity_service(config: &AppConfig, conn: Connection) -> Result<IdentityService, CommonError> {
    let repo = Arc::new(IdentityRepository::new(conn));

    let session_secret = Arc::new(SessionSecret::load_or_init(&config.data_dir)?);
    let admin_keys = Arc::new(AdminKeyManager::new(repo.clone(), config.data_dir.clone()));
    let authenticator = Arc::new(ApiKeyAuthenticator::new(repo.clone(), repo.clone()));

    // Spec §8 S5: the registration endpoint allows exactly 10 requests per
    // caller IP per hour before returning `rate_limit_exceeded`.
    let login_rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default()));
    let registration_rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default()));

    Ok(IdentityService {
        users: repo.clone(),
        clients: repo.clone(),
        profiles: repo.clone(),
        groups: repo.clone(),
        sessions: repo,
        admin_keys,
        session_secret,
        authenticator,
        login_rate_limiter,
        registration_rate_limiter,
        data_dir: config.data_dir.clone(),
    })
}

async fn build_gateway_service(
    config: &AppConfig,
    conn: Connection,
    identity: &IdentityService,
) -> Result<GatewayService, CommonError> {
    let repo = Arc::new(GatewayRepository::new(conn.clone()));
    let credential_row_repo = Arc::new(CredentialRowAdapter::new(conn.clone()));
    let audit_repo = audit::SqliteAuditRepository::new(conn);

    let vault = Arc::new(CredentialVault::load_or_init(&config.data_dir)?);
    let kill_switch = Arc::new(KillSwitchRegistry::new());
    let shared_pool = SharedMcpManager::new();
    let user_pool = gateway::PerUserMcpPool::new(UserPoolConfig::default());
    user_pool.spawn_background_loops();

    let tool_router = Arc::new(ToolRouter::new(
        repo.clone(),
        repo.clone(),
        repo.clone(),
        identity.groups.clone(),
        identity.users.clone(),
        shared_pool.clone(),
        user_pool.clone(),
        kill_switch.clone(),
        vault.clone(),
    ));

    let reloader = Arc::new(CatalogReloader::new(repo.clone(), shared_pool.clone(), user_pool.clone()));
    // Bring the shared pool up to date with whatever is already `published`
    // in the catalog. A failure here (e.g. one misconfigured downstream
    // server) must not prevent the rest of the process from starting.
    if let Err(err) = reloader.apply().await {
        warn!(error = ?err, "initial catalog reload failed, starting with an empty shared pool");
    }

    let audit = AuditBuffer::new(AuditBufferConfig::default(), Arc::new(RepositorySink::new(audit_repo)));
    audit.start().await;

    Ok(GatewayService {
        identity: identity.clone(),
        catalog: repo.clone(),
        subscriptions: repo.clone(),
        credentials: repo,
        shared_pool,
        user_pool,
        tool_router,
        reloader,
        kill_switch,
        vault,
        credential_row_repo,
        audit,
    })
}
