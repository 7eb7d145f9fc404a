pub mod sqlite;

use async_trait::async_trait;
use shared::error::CommonError;
use shared::primitives::{PaginatedResponse, PaginationRequest, WrappedUuidV4};

use crate::model::{AdminKey, Client, Group, ToolProfile, User, UserSession};

#[async_trait]
pub trait UserRepositoryLike: Send + Sync {
    async fn create(&self, user: &User) -> Result<(), CommonError>;
    async fn get_by_id(&self, user_id: &WrappedUuidV4) -> Result<User, CommonError>;
    async fn get_by_username(&self, username: &str) -> Result<Option<User>, CommonError>;
    async fn update(&self, user: &User) -> Result<(), CommonError>;
    async fn delete(&self, user_id: &WrappedUuidV4) -> Result<(), CommonError>;
    async fn list(&self, pagination: &PaginationRequest) -> Result<PaginatedResponse<User>, CommonError>;
}

#[async_trait]
pub trait ClientRepositoryLike: Send + Sync {
    async fn create(&self, client: &Client) -> Result<(), CommonError>;
    async fn get_by_id(&self, client_id: &WrappedUuidV4) -> Result<Client, CommonError>;
    async fn list_for_user(
        &self,
        user_id: &WrappedUuidV4,
        pagination: &PaginationRequest,
    ) -> Result<PaginatedResponse<Client>, CommonError>;
    async fn update(&self, client: &Client) -> Result<(), CommonError>;
    async fn delete(&self, client_id: &WrappedUuidV4) -> Result<(), CommonError>;
    /// Fire-and-forget eventual-consistency update.
    async fn touch_last_used(&self, client_id: &WrappedUuidV4);
}

#[async_trait]
pub trait AdminKeyRepositoryLike: Send + Sync {
    async fn get_active(&self) -> Result<Option<AdminKey>, CommonError>;
    async fn get_by_id(&self, id: &WrappedUuidV4) -> Result<AdminKey, CommonError>;
    async fn insert(&self, key: &AdminKey) -> Result<(), CommonError>;
    async fn update(&self, key: &AdminKey) -> Result<(), CommonError>;
    async fn deactivate_all(&self) -> Result<(), CommonError>;
}

#[async_trait]
pub trait ToolProfileRepositoryLike: Send + Sync {
    async fn create(&self, profile: &ToolProfile) -> Result<(), CommonError>;
    async fn get_by_id(&self, profile_id: &WrappedUuidV4) -> Result<ToolProfile, CommonError>;
    async fn get_by_name(&self, name: &str) -> Result<Option<ToolProfile>, CommonError>;
    async fn update(&self, profile: &ToolProfile) -> Result<(), CommonError>;
    async fn delete(&self, profile_id: &WrappedUuidV4) -> Result<(), CommonError>;
    async fn list(&self, pagination: &PaginationRequest) -> Result<PaginatedResponse<ToolProfile>, CommonError>;
}

#[async_trait]
pub trait GroupRepositoryLike: Send + Sync {
    async fn create(&self, group: &Group) -> Result<(), CommonError>;
    async fn get_by_id(&self, group_id: &WrappedUuidV4) -> Result<Group, CommonError>;
    async fn update(&self, group: &Group) -> Result<(), CommonError>;
    async fn delete(&self, group_id: &WrappedUuidV4) -> Result<(), CommonError>;
    async fn list(&self, pagination: &PaginationRequest) -> Result<PaginatedResponse<Group>, CommonError>;
    async fn add_user_member(&self, group_id: &WrappedUuidV4, user_id: &WrappedUuidV4) -> Result<(), CommonError>;
    async fn remove_user_member(&self, group_id: &WrappedUuidV4, user_id: &WrappedUuidV4) -> Result<(), CommonError>;
    async fn add_mcp_member(&self, group_id: &WrappedUuidV4, mcp_id: &WrappedUuidV4) -> Result<(), CommonError>;
    async fn remove_mcp_member(&self, group_id: &WrappedUuidV4, mcp_id: &WrappedUuidV4) -> Result<(), CommonError>;
    /// Groups `user_id` directly belongs to, for display in `SessionContext`.
    async fn list_for_user(&self, user_id: &WrappedUuidV4) -> Result<Vec<Group>, CommonError>;
    /// `∃g: (user,g) ∧ (mcp,g) ∧ g.status=active`. The
    /// caller is responsible for additionally checking `mcp.status=published`.
    async fn user_has_group_access(
        &self,
        user_id: &WrappedUuidV4,
        mcp_id: &WrappedUuidV4,
    ) -> Result<bool, CommonError>;
}

#[async_trait]
pub trait SessionRepositoryLike: Send + Sync {
    async fn insert(&self, session: &UserSession) -> Result<(), CommonError>;
    async fn get_by_id(&self, session_id: &WrappedUuidV4) -> Result<UserSession, CommonError>;
    async fn update(&self, session: &UserSession) -> Result<(), CommonError>;
    async fn delete(&self, session_id: &WrappedUuidV4) -> Result<(), CommonError>;
}
