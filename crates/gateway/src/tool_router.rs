//! Composes the shared and per-user catalogs, resolves a client's
//! whitelist from its active subscriptions, and dispatches tool calls.

use std::sync::Arc;

use identity::repository::{GroupRepositoryLike, UserRepositoryLike};
use shared::error::CommonError;
use shared::primitives::WrappedUuidV4;

use crate::connection::{build_transport_config, ToolInvocationResult};
use crate::kill_switch::KillSwitchRegistry;
use crate::model::{IsolationMode, McpCatalogEntry, McpStatus, SubscriptionStatus};
use crate::repository::{CredentialRepositoryLike, McpCatalogRepositoryLike, SubscriptionRepositoryLike};
use crate::shared_pool::SharedMcpManager;
use crate::user_pool::PerUserMcpPool;
use vault::CredentialVault;

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct CatalogEntryView {
    pub mcp_name: String,
    pub tool_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(skip)]
    pub disallowed_patterns: Vec<String>,
}

pub struct ToolRouter {
    catalog_repo: Arc<dyn McpCatalogRepositoryLike>,
    subscription_repo: Arc<dyn SubscriptionRepositoryLike>,
    credential_repo: Arc<dyn CredentialRepositoryLike>,
    group_repo: Arc<dyn GroupRepositoryLike>,
    user_repo: Arc<dyn UserRepositoryLike>,
    shared_pool: Arc<SharedMcpManager>,
    user_pool: Arc<PerUserMcpPool>,
    kill_switch: Arc<KillSwitchRegistry>,
    vault: Arc<CredentialVault>,
}

impl ToolRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog_repo: Arc<dyn McpCatalogRepositoryLike>,
        subscription_repo: Arc<dyn SubscriptionRepositoryLike>,
        credential_repo: Arc<dyn CredentialRepositoryLike>,
        group_repo: Arc<dyn GroupRepositoryLike>,
        user_repo: Arc<dyn UserRepositoryLike>,
        shared_pool: Arc<SharedMcpManager>,
        user_pool: Arc<PerUserMcpPool>,
        kill_switch: Arc<KillSwitchRegistry>,
        vault: Arc<CredentialVault>,
    ) -> Self {
        Self {
            catalog_repo,
            subscription_repo,
            credential_repo,
            group_repo,
            user_repo,
            shared_pool,
            user_pool,
            kill_switch,
            vault,
        }
    }

    /// The set of tool names a client may invoke, each tagged with the MCP
    /// it came from.
    async fn whitelist(
        &self,
        user_id: &WrappedUuidV4,
        client_id: &WrappedUuidV4,
    ) -> Result<Vec<(McpCatalogEntry, String)>, CommonError> {
        let subscriptions = self.subscription_repo.list_active_for_client(client_id).await?;
        let mut whitelist = Vec::new();

        for sub in subscriptions {
            if sub.status != SubscriptionStatus::Active {
                continue;
            }
            let entry = self.catalog_repo.get_by_id(&sub.mcp_id).await?;
            if entry.status != McpStatus::Published {
                continue;
            }
            if !self.group_repo.user_has_group_access(user_id, &sub.mcp_id).await? {
                continue;
            }
            if self.kill_switch.is_blocked(&entry.name) {
                continue;
            }

            let tool_names: Vec<String> = if sub.selected_tools.is_empty() {
                entry
                    .tool_catalog
                    .get_inner()
                    .as_array()
                    .map(|arr| arr.iter().filter_map(|t| t.get("name")?.as_str().map(String::from)).collect())
                    .unwrap_or_default()
            } else {
                sub.selected_tools.clone()
            };

            for tool_name in tool_names {
                whitelist.push((entry.clone(), tool_name));
            }
        }

        Ok(whitelist)
    }

    /// `getIsolationAwareToolCatalog(user, client)`: the visible catalog,
    /// deterministically ordered by `(mcp_name, tool_name)`.
    pub async fn isolation_aware_tool_catalog(
        &self,
        user_id: &WrappedUuidV4,
        client_id: &WrappedUuidV4,
    ) -> Result<Vec<CatalogEntryView>, CommonError> {
        let whitelist = self.whitelist(user_id, client_id).await?;
        let mut views: Vec<CatalogEntryView> = Vec::with_capacity(whitelist.len());

        for (entry, tool_name) in whitelist {
            let description = entry
                .tool_catalog
                .get_inner()
                .as_array()
                .and_then(|arr| arr.iter().find(|t| t.get("name").and_then(|n| n.as_str()) == Some(tool_name.as_str())))
                .and_then(|t| t.get("description"))
                .and_then(|d| d.as_str())
                .unwrap_or_default()
                .to_string();
            let tool_entry = entry
                .tool_catalog
                .get_inner()
                .as_array()
                .and_then(|arr| arr.iter().find(|t| t.get("name").and_then(|n| n.as_str()) == Some(tool_name.as_str())))
                .cloned();
            let input_schema = tool_entry
                .as_ref()
                .and_then(|t| t.get("inputSchema"))
                .cloned()
                .unwrap_or_else(|| serde_json::json!({"type": "object"}));
            let disallowed_patterns = tool_entry
                .as_ref()
                .and_then(|t| t.get("disallowedPatterns"))
                .and_then(|p| p.as_array())
                .map(|arr| arr.iter().filter_map(|p| p.as_str().map(String::from)).collect())
                .unwrap_or_default();

            views.push(CatalogEntryView { mcp_name: entry.name.clone(), tool_name, description, input_schema, disallowed_patterns });
        }

        views.sort_by(|a, b| (a.mcp_name.as_str(), a.tool_name.as_str()).cmp(&(b.mcp_name.as_str(), b.tool_name.as_str())));
        Ok(views)
    }

    /// Dispatches `(tool_name, args)` for `(user, client)`. Tool-not-found
    /// never reveals whether the name exists outside the whitelist.
    pub async fn invoke(
        &self,
        user_id: &WrappedUuidV4,
        client_id: &WrappedUuidV4,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<ToolInvocationResult, CommonError> {
        let whitelist = self.whitelist(user_id, client_id).await?;
        let Some((entry, _)) = whitelist.iter().find(|(_, name)| name == tool_name) else {
            return Err(CommonError::NotFound {
                msg: "tool_not_found".to_string(),
                lookup_id: tool_name.to_string(),
                source: None,
            });
        };

        match entry.isolation_mode {
            IsolationMode::Shared => self.shared_pool.invoke_tool(&entry.name, tool_name, args).await,
            IsolationMode::PerUser => {
                let credentials = self.decrypt_credentials(user_id, entry).await?;
                let entry_config = entry.config.get_inner().clone();
                let transport_type = entry.transport_type;
                let mcp_name = entry.name.clone();
                let call_timeout = entry.timeout_seconds.map(std::time::Duration::from_secs);
                self.user_pool
                    .invoke_tool(&user_id.to_string(), &mcp_name, tool_name, args, call_timeout, move || {
                        build_transport_config(transport_type, &entry_config, credentials.as_ref())
                            .unwrap_or(crate::connection::TransportConfig::Http { url: String::new(), headers: Default::default() })
                    })
                    .await
            }
        }
    }

    async fn decrypt_credentials(
        &self,
        user_id: &WrappedUuidV4,
        entry: &McpCatalogEntry,
    ) -> Result<Option<serde_json::Value>, CommonError> {
        if !entry.requires_user_credentials {
            return Ok(None);
        }
        let Some(cred) = self.credential_repo.get(user_id, &entry.mcp_id).await? else {
            return Err(CommonError::MissingCredentials {
                msg: format!("no stored credentials for mcp {}", entry.name),
            });
        };
        let user = self.user_repo.get_by_id(user_id).await?;
        let plaintext = self.vault.decrypt(&user.vault_salt, &cred.encrypted_credentials).await?;
        let value: serde_json::Value = serde_json::from_slice(&plaintext).map_err(CommonError::from)?;
        Ok(Some(value))
    }
}
