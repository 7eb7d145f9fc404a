//! Pool of [`McpConnection`]s shared across all users, one per published
//! MCP with `isolation_mode = shared`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use shared::error::CommonError;
use tokio::sync::RwLock;

use crate::connection::{ConnectionEvent, McpConnection, ToolDescriptor, ToolInvocationResult, TransportConfig};
use crate::model::McpCatalogEntry;

#[derive(Debug, Clone)]
pub struct CatalogedTool {
    pub mcp_name: String,
    pub tool: ToolDescriptor,
}

pub struct SharedMcpManager {
    connections: RwLock<HashMap<String, Arc<McpConnection>>>,
    catalog: RwLock<Vec<CatalogedTool>>,
}

impl SharedMcpManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { connections: RwLock::new(HashMap::new()), catalog: RwLock::new(Vec::new()) })
    }

    /// Starts one connection per entry; individual failures are logged and
    /// do not abort the rest of the batch.
    pub async fn initialize(self: &Arc<Self>, entries: &[(McpCatalogEntry, TransportConfig)]) {
        for (entry, transport) in entries {
            let call_timeout = entry.timeout_seconds.map(Duration::from_secs);
            if let Err(e) = self.start_one(&entry.name, transport.clone(), call_timeout).await {
                tracing::warn!(mcp = %entry.name, error = %e, "failed to start shared mcp connection");
            }
        }
    }

    pub async fn start_one(
        self: &Arc<Self>,
        mcp_name: &str,
        transport: TransportConfig,
        call_timeout: Option<Duration>,
    ) -> Result<(), CommonError> {
        let connection = Arc::new(McpConnection::new(mcp_name, transport, call_timeout));
        connection.start().await?;

        self.watch(connection.clone());
        self.connections.write().await.insert(mcp_name.to_string(), connection);
        self.recompute_catalog().await;
        Ok(())
    }

    pub async fn stop_one(&self, mcp_name: &str) {
        if let Some(connection) = self.connections.write().await.remove(mcp_name) {
            let _ = connection.stop().await;
        }
        self.recompute_catalog().await;
    }

    fn watch(self: &Arc<Self>, connection: Arc<McpConnection>) {
        let manager = self.clone();
        let mut events = connection.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    ConnectionEvent::Disconnect { mcp_name, .. } | ConnectionEvent::Error { mcp_name, .. } => {
                        manager.recompute_catalog().await;
                        tracing::warn!(mcp = %mcp_name, "shared mcp connection event triggered catalog recompute");
                    }
                    ConnectionEvent::Connect { .. } => {
                        manager.recompute_catalog().await;
                    }
                }
            }
        });
    }

    /// Recomputes the aggregated catalog. First-seen tool name wins within
    /// the pool; later duplicates are logged and skipped.
    async fn recompute_catalog(&self) {
        let connections = self.connections.read().await;
        let mut seen = std::collections::HashSet::new();
        let mut names: Vec<&String> = connections.keys().collect();
        names.sort();

        let mut catalog = Vec::new();
        for mcp_name in names {
            let connection = &connections[mcp_name];
            for tool in connection.tool_catalog().await {
                if !seen.insert(tool.name.clone()) {
                    tracing::warn!(mcp = %mcp_name, tool = %tool.name, "duplicate tool name skipped in shared pool");
                    continue;
                }
                catalog.push(CatalogedTool { mcp_name: mcp_name.clone(), tool });
            }
        }
        *self.catalog.write().await = catalog;
    }

    pub async fn tool_catalog(&self) -> Vec<CatalogedTool> {
        self.catalog.read().await.clone()
    }

    pub async fn has_mcp(&self, mcp_name: &str) -> bool {
        self.connections.read().await.contains_key(mcp_name)
    }

    pub async fn invoke_tool(
        &self,
        mcp_name: &str,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<ToolInvocationResult, CommonError> {
        let connection = self
            .connections
            .read()
            .await
            .get(mcp_name)
            .cloned()
            .ok_or_else(|| CommonError::UpstreamDisconnected { mcp_name: mcp_name.to_string() })?;
        connection.invoke_tool(tool_name, args).await
    }

    pub async fn shutdown(&self) {
        let mut connections = self.connections.write().await;
        for (_, connection) in connections.drain() {
            let _ = connection.stop().await;
        }
    }
}
