//! Diffs the committed catalog against the running pool state and applies
//! creations/removals under a single mutex.

use std::sync::Arc;

use shared::error::CommonError;
use tokio::sync::Mutex;

use crate::connection::build_transport_config;
use crate::model::{IsolationMode, McpCatalogEntry, McpStatus};
use crate::repository::McpCatalogRepositoryLike;
use crate::shared_pool::SharedMcpManager;
use crate::user_pool::PerUserMcpPool;

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct CatalogDiff {
    pub to_create: Vec<String>,
    pub to_update: Vec<String>,
    pub to_archive_or_delete: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct ApplyResult {
    pub mcp_name: String,
    pub action: &'static str,
    pub success: bool,
    pub error: Option<String>,
}

pub struct CatalogReloader {
    catalog_repo: Arc<dyn McpCatalogRepositoryLike>,
    shared_pool: Arc<SharedMcpManager>,
    user_pool: Arc<PerUserMcpPool>,
    apply_lock: Mutex<()>,
}

impl CatalogReloader {
    pub fn new(
        catalog_repo: Arc<dyn McpCatalogRepositoryLike>,
        shared_pool: Arc<SharedMcpManager>,
        user_pool: Arc<PerUserMcpPool>,
    ) -> Self {
        Self { catalog_repo, shared_pool, user_pool, apply_lock: Mutex::new(()) }
    }

    async fn published_shared_entries(&self) -> Result<Vec<McpCatalogEntry>, CommonError> {
        Ok(self
            .catalog_repo
            .list_by_status(McpStatus::Published)
            .await?
            .into_iter()
            .filter(|e| e.isolation_mode == IsolationMode::Shared)
            .collect())
    }

    /// Computes the diff against a consistent database snapshot without
    /// applying it.
    pub async fn preview_changes(&self) -> Result<CatalogDiff, CommonError> {
        let published = self.published_shared_entries().await?;
        let running: std::collections::HashSet<String> =
            futures::future::join_all(published.iter().map(|e| self.shared_pool.has_mcp(&e.name)))
                .await
                .into_iter()
                .zip(published.iter())
                .filter_map(|(running, e)| running.then(|| e.name.clone()))
                .collect();

        let published_names: std::collections::HashSet<String> = published.iter().map(|e| e.name.clone()).collect();

        let to_create = published.iter().filter(|e| !running.contains(&e.name)).map(|e| e.name.clone()).collect();
        // structural changes on published rows are forbidden upstream, so
        // "update" only ever means a metadata-only refresh already applied
        // in the database; nothing to diff here beyond recomputation.
        let to_update = Vec::new();
        let to_archive_or_delete = running.iter().filter(|name| !published_names.contains(*name)).cloned().collect();

        Ok(CatalogDiff { to_create, to_update, to_archive_or_delete })
    }

    /// Applies the diff. Concurrent attempts fail fast with
    /// `reload_in_progress` (HTTP 409) rather than queueing.
    pub async fn apply(&self) -> Result<Vec<ApplyResult>, CommonError> {
        let Ok(_guard) = self.apply_lock.try_lock() else {
            return Err(CommonError::ReloadInProgress);
        };

        let diff = self.preview_changes().await?;
        let mut results = Vec::new();

        for mcp_name in &diff.to_create {
            let entry = match self.catalog_repo.get_by_name(mcp_name).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    results.push(ApplyResult { mcp_name: mcp_name.clone(), action: "create", success: false, error: Some(e.to_string()) });
                    continue;
                }
            };

            let transport = match build_transport_config(entry.transport_type, entry.config.get_inner(), None) {
                Ok(t) => t,
                Err(e) => {
                    results.push(ApplyResult { mcp_name: mcp_name.clone(), action: "create", success: false, error: Some(e.to_string()) });
                    continue;
                }
            };

            let call_timeout = entry.timeout_seconds.map(std::time::Duration::from_secs);
            match self.shared_pool.start_one(mcp_name, transport, call_timeout).await {
                Ok(()) => results.push(ApplyResult { mcp_name: mcp_name.clone(), action: "create", success: true, error: None }),
                Err(e) => results.push(ApplyResult { mcp_name: mcp_name.clone(), action: "create", success: false, error: Some(e.to_string()) }),
            }
        }

        for mcp_name in &diff.to_archive_or_delete {
            self.shared_pool.stop_one(mcp_name).await;
            self.user_pool.terminate_for_mcp(mcp_name).await;
            results.push(ApplyResult { mcp_name: mcp_name.clone(), action: "archive_or_delete", success: true, error: None });
        }

        Ok(results)
    }
}
