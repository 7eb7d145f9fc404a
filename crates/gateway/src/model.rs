//! Entities owned by the gateway crate: `McpCatalogEntry`,
//! `Subscription`, `UserMcpCredential`.

use serde::{Deserialize, Serialize};
use shared::primitives::{WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Stdio,
    Http,
    Sse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    Shared,
    PerUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum McpStatus {
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    None,
    Static,
    Oauth2,
}

/// A declared downstream tool server. Structural
/// fields (`name`, `transport_type`, `config`, `isolation_mode`) are
/// immutable once `status = published` — enforced in the repository layer,
/// not here.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct McpCatalogEntry {
    pub mcp_id: WrappedUuidV4,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub transport_type: TransportType,
    pub config: WrappedJsonValue,
    pub isolation_mode: IsolationMode,
    pub requires_user_credentials: bool,
    pub credential_schema: Option<WrappedJsonValue>,
    pub tool_catalog: WrappedJsonValue,
    pub validation_status: ValidationStatus,
    pub status: McpStatus,
    pub auth_type: AuthType,
    pub oauth_config: Option<WrappedJsonValue>,
    /// Per-invocation deadline in seconds; `None` falls back to the
    /// connection's default.
    pub timeout_seconds: Option<u64>,
    pub created_at: WrappedChronoDateTime,
    pub updated_at: WrappedChronoDateTime,
}

impl McpCatalogEntry {
    /// The fields that are immutable once published.
    pub fn structural_fields_equal(&self, other: &McpCatalogEntry) -> bool {
        self.name == other.name
            && self.transport_type == other.transport_type
            && self.config.get_inner() == other.config.get_inner()
            && self.isolation_mode == other.isolation_mode
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Subscription {
    pub subscription_id: WrappedUuidV4,
    pub client_id: WrappedUuidV4,
    pub mcp_id: WrappedUuidV4,
    pub selected_tools: Vec<String>,
    pub status: SubscriptionStatus,
    pub subscribed_at: WrappedChronoDateTime,
    pub updated_at: WrappedChronoDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserMcpCredential {
    pub credential_id: WrappedUuidV4,
    pub user_id: WrappedUuidV4,
    pub mcp_id: WrappedUuidV4,
    #[serde(skip_serializing)]
    pub encrypted_credentials: Vec<u8>,
    #[serde(skip_serializing)]
    pub encryption_iv: Vec<u8>,
    pub created_at: WrappedChronoDateTime,
    pub updated_at: WrappedChronoDateTime,
}
