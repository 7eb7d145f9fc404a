pub mod sqlite;

use async_trait::async_trait;
use shared::error::CommonError;
use shared::primitives::{PaginatedResponse, PaginationRequest, WrappedUuidV4};

use crate::model::{McpCatalogEntry, McpStatus, Subscription, UserMcpCredential};

#[async_trait]
pub trait McpCatalogRepositoryLike: Send + Sync {
    async fn create(&self, entry: &McpCatalogEntry) -> Result<(), CommonError>;
    async fn get_by_id(&self, mcp_id: &WrappedUuidV4) -> Result<McpCatalogEntry, CommonError>;
    async fn get_by_name(&self, name: &str) -> Result<Option<McpCatalogEntry>, CommonError>;
    async fn update(&self, entry: &McpCatalogEntry) -> Result<(), CommonError>;
    /// `archived` entries only; enforced by the caller before invoking this.
    async fn delete(&self, mcp_id: &WrappedUuidV4) -> Result<(), CommonError>;
    async fn list(
        &self,
        pagination: &PaginationRequest,
    ) -> Result<PaginatedResponse<McpCatalogEntry>, CommonError>;
    async fn list_by_status(&self, status: McpStatus) -> Result<Vec<McpCatalogEntry>, CommonError>;
}

#[async_trait]
pub trait SubscriptionRepositoryLike: Send + Sync {
    async fn create(&self, sub: &Subscription) -> Result<(), CommonError>;
    async fn get_by_id(&self, subscription_id: &WrappedUuidV4) -> Result<Subscription, CommonError>;
    async fn update(&self, sub: &Subscription) -> Result<(), CommonError>;
    async fn delete(&self, subscription_id: &WrappedUuidV4) -> Result<(), CommonError>;
    async fn list_for_client(&self, client_id: &WrappedUuidV4) -> Result<Vec<Subscription>, CommonError>;
    async fn list_active_for_client(
        &self,
        client_id: &WrappedUuidV4,
    ) -> Result<Vec<Subscription>, CommonError>;
    /// Every subscription across every client owned by `user_id`.
    async fn list_for_user(&self, user_id: &WrappedUuidV4) -> Result<Vec<Subscription>, CommonError>;
}

#[async_trait]
pub trait CredentialRepositoryLike: Send + Sync {
    async fn upsert(&self, cred: &UserMcpCredential) -> Result<(), CommonError>;
    async fn get(
        &self,
        user_id: &WrappedUuidV4,
        mcp_id: &WrappedUuidV4,
    ) -> Result<Option<UserMcpCredential>, CommonError>;
    async fn delete_for_user(&self, user_id: &WrappedUuidV4) -> Result<(), CommonError>;
    /// Used by the vault's master-key rotation transaction.
    async fn list_all(&self) -> Result<Vec<UserMcpCredential>, CommonError>;
}
