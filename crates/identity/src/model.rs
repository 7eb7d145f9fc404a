//! Entities owned by the identity crate: `User`, `Client`,
//! `AdminKey`, `ToolProfile`, `Group`, `UserSession`.

use serde::{Deserialize, Serialize};
use shared::primitives::{WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
    Deactivated,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub user_id: WrappedUuidV4,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub status: UserStatus,
    #[serde(skip_serializing)]
    pub vault_salt: Vec<u8>,
    pub display_name: String,
    pub email: Option<String>,
    pub is_admin: bool,
    pub created_at: WrappedChronoDateTime,
    pub updated_at: WrappedChronoDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Active,
    Suspended,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Client {
    pub client_id: WrappedUuidV4,
    pub client_name: String,
    pub key_prefix: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub user_id: WrappedUuidV4,
    pub profile_id: WrappedUuidV4,
    pub status: ClientStatus,
    pub created_at: WrappedChronoDateTime,
    pub expires_at: Option<WrappedChronoDateTime>,
    pub last_used_at: Option<WrappedChronoDateTime>,
    pub metadata: WrappedJsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdminKey {
    pub id: WrappedUuidV4,
    #[serde(skip_serializing)]
    pub key_hash: String,
    #[serde(skip_serializing)]
    pub recovery_token_hash: String,
    pub is_active: bool,
    pub created_at: WrappedChronoDateTime,
    pub rotated_at: Option<WrappedChronoDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
pub struct RateLimits {
    pub rpm: Option<u32>,
    pub rph: Option<u32>,
    pub max_concurrent: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TimeRestrictions {
    /// Hour-of-day (UTC) window during which the profile may be used;
    /// `None` means unrestricted.
    pub allowed_hours_utc: Option<(u8, u8)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolProfile {
    pub profile_id: WrappedUuidV4,
    pub name: String,
    pub description: String,
    pub allowed_tools: Vec<String>,
    pub denied_tools: Vec<String>,
    pub rate_limits: RateLimits,
    pub inherited_from: Option<WrappedUuidV4>,
    pub environment_scope: Option<String>,
    pub time_restrictions: TimeRestrictions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Active,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Group {
    pub group_id: WrappedUuidV4,
    pub name: String,
    pub description: String,
    pub status: GroupStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Idle,
    SpinningDown,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserSession {
    pub session_id: WrappedUuidV4,
    pub user_id: WrappedUuidV4,
    pub client_id: Option<WrappedUuidV4>,
    pub status: SessionStatus,
    pub issued_at: WrappedChronoDateTime,
    pub expires_at: WrappedChronoDateTime,
    #[serde(skip_serializing)]
    pub hmac_signature: String,
}
