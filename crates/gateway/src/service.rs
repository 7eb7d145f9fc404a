//! Shared axum state for every router in this crate.

use std::sync::Arc;

use audit::AuditBuffer;
use identity::service::IdentityService;
use vault::CredentialVault;

use crate::kill_switch::KillSwitchRegistry;
use crate::reloader::CatalogReloader;
use crate::repository::{CredentialRepositoryLike, McpCatalogRepositoryLike, SubscriptionRepositoryLike};
use crate::shared_pool::SharedMcpManager;
use crate::tool_router::ToolRouter;
use crate::user_pool::PerUserMcpPool;

/// Admin/session gating for this crate's routers is delegated to the
/// identity crate's guards, so the identity service rides along here
/// rather than being duplicated.
#[derive(Clone)]
pub struct GatewayService {
    pub identity: IdentityService,
    pub catalog: Arc<dyn McpCatalogRepositoryLike>,
    pub subscriptions: Arc<dyn SubscriptionRepositoryLike>,
    pub credentials: Arc<dyn CredentialRepositoryLike>,
    pub shared_pool: Arc<SharedMcpManager>,
    pub user_pool: Arc<PerUserMcpPool>,
    pub tool_router: Arc<ToolRouter>,
    pub reloader: Arc<CatalogReloader>,
    pub kill_switch: Arc<KillSwitchRegistry>,
    pub vault: Arc<CredentialVault>,
    /// Backs [`crate::router::admin::route_rotate_credential_key`]. The
    /// vault crate's own `router()` exposes the same operation without an
    /// admin check (it has no dependency on identity's guards), so the
    /// server wires this admin-gated equivalent instead of mounting it.
    pub credential_row_repo: Arc<dyn vault::CredentialRowRepositoryLike>,
    pub audit: Arc<AuditBuffer>,
}
