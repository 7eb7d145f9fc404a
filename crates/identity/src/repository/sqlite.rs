//! Sqlite-backed implementation of the identity crate's repository traits,
//! following the row-mapping style of `audit::repository` and the
//! `conn: shared::libsql::Connection` holder shape used throughout the
//! persistence layer.

use async_trait::async_trait;
use shared::error::CommonError;
use shared::libsql::Connection;
use shared::primitives::{
    PaginatedResponse, PaginationRequest, WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4,
};

use crate::model::{
    AdminKey, Client, ClientStatus, Group, GroupStatus, RateLimits, TimeRestrictions, ToolProfile,
    User, UserSession, UserStatus,
};
use crate::repository::{
    AdminKeyRepositoryLike, ClientRepositoryLike, GroupRepositoryLike, SessionRepositoryLike,
    ToolProfileRepositoryLike, UserRepositoryLike,
};

#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn not_found(entity: &str, id: &str) -> CommonError {
    CommonError::NotFound {
        msg: format!("{entity} {id} not found"),
        lookup_id: id.to_string(),
        source: None,
    }
}

fn user_status_str(status: UserStatus) -> &'static str {
    match status {
        UserStatus::Active => "active",
        UserStatus::Suspended => "suspended",
        UserStatus::Deactivated => "deactivated",
    }
}

fn parse_user_status(s: &str) -> Result<UserStatus, CommonError> {
    Ok(match s {
        "active" => UserStatus::Active,
        "suspended" => UserStatus::Suspended,
        "deactivated" => UserStatus::Deactivated,
        other => {
            return Err(CommonError::Internal {
                source: anyhow::anyhow!("unknown user status in row: {other}"),
            });
        }
    })
}

fn client_status_str(status: ClientStatus) -> &'static str {
    match status {
        ClientStatus::Active => "active",
        ClientStatus::Suspended => "suspended",
        ClientStatus::Revoked => "revoked",
    }
}

fn parse_client_status(s: &str) -> Result<ClientStatus, CommonError> {
    Ok(match s {
        "active" => ClientStatus::Active,
        "suspended" => ClientStatus::Suspended,
        "revoked" => ClientStatus::Revoked,
        other => {
            return Err(CommonError::Internal {
                source: anyhow::anyhow!("unknown client status in row: {other}"),
            });
        }
    })
}

fn group_status_str(status: GroupStatus) -> &'static str {
    match status {
        GroupStatus::Active => "active",
        GroupStatus::Suspended => "suspended",
    }
}

fn parse_group_status(s: &str) -> Result<GroupStatus, CommonError> {
    Ok(match s {
        "active" => GroupStatus::Active,
        "suspended" => GroupStatus::Suspended,
        other => {
            return Err(CommonError::Internal {
                source: anyhow::anyhow!("unknown group status in row: {other}"),
            });
        }
    })
}

fn session_status_str(status: crate::model::SessionStatus) -> &'static str {
    use crate::model::SessionStatus;
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Idle => "idle",
        SessionStatus::SpinningDown => "spinning_down",
        SessionStatus::Expired => "expired",
    }
}

fn parse_session_status(s: &str) -> Result<crate::model::SessionStatus, CommonError> {
    use crate::model::SessionStatus;
    Ok(match s {
        "active" => SessionStatus::Active,
        "idle" => SessionStatus::Idle,
        "spinning_down" => SessionStatus::SpinningDown,
        "expired" => SessionStatus::Expired,
        other => {
            return Err(CommonError::Internal {
                source: anyhow::anyhow!("unknown session status in row: {other}"),
            });
        }
    })
}

fn row_to_user(row: &libsql::Row) -> Result<User, CommonError> {
    let user_id: String = row.get(0).map_err(CommonError::from)?;
    let username: String = row.get(1).map_err(CommonError::from)?;
    let password_hash: String = row.get(2).map_err(CommonError::from)?;
    let status: String = row.get(3).map_err(CommonError::from)?;
    let vault_salt: Vec<u8> = row.get(4).map_err(CommonError::from)?;
    let display_name: String = row.get(5).map_err(CommonError::from)?;
    let email: Option<String> = row.get(6).map_err(CommonError::from)?;
    let is_admin: i64 = row.get(7).map_err(CommonError::from)?;
    let created_at: String = row.get(8).map_err(CommonError::from)?;
    let updated_at: String = row.get(9).map_err(CommonError::from)?;

    Ok(User {
        user_id: WrappedUuidV4::try_from(user_id).map_err(CommonError::from)?,
        username,
        password_hash,
        status: parse_user_status(&status)?,
        vault_salt,
        display_name,
        email,
        is_admin: is_admin != 0,
        created_at: WrappedChronoDateTime::try_from(created_at.as_str()).map_err(CommonError::from)?,
        updated_at: WrappedChronoDateTime::try_from(updated_at.as_str()).map_err(CommonError::from)?,
    })
}

#[async_trait]
impl UserRepositoryLike for Repository {
    async fn create(&self, user: &User) -> Result<(), CommonError> {
        self.conn
            .execute(
                "INSERT INTO users (
                    user_id, username, password_hash, status, vault_salt, display_name,
                    email, is_admin, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                libsql::params![
                    user.user_id.to_string(),
                    user.username.clone(),
                    user.password_hash.clone(),
                    user_status_str(user.status),
                    user.vault_salt.clone(),
                    user.display_name.clone(),
                    user.email.clone(),
                    user.is_admin as i64,
                    user.created_at.to_string(),
                    user.updated_at.to_string(),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn get_by_id(&self, user_id: &WrappedUuidV4) -> Result<User, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT user_id, username, password_hash, status, vault_salt, display_name,
                        email, is_admin, created_at, updated_at
                 FROM users WHERE user_id = ?1",
                libsql::params![user_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;

        match rows.next().await.map_err(CommonError::from)? {
            Some(row) => row_to_user(&row),
            None => Err(not_found("user", &user_id.to_string())),
        }
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT user_id, username, password_hash, status, vault_salt, display_name,
                        email, is_admin, created_at, updated_at
                 FROM users WHERE username = ?1",
                libsql::params![username.to_string()],
            )
            .await
            .map_err(CommonError::from)?;

        match rows.next().await.map_err(CommonError::from)? {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, user: &User) -> Result<(), CommonError> {
        self.conn
            .execute(
                "UPDATE users SET username = ?2, password_hash = ?3, status = ?4,
                    vault_salt = ?5, display_name = ?6, email = ?7, is_admin = ?8, updated_at = ?9
                 WHERE user_id = ?1",
                libsql::params![
                    user.user_id.to_string(),
                    user.username.clone(),
                    user.password_hash.clone(),
                    user_status_str(user.status),
                    user.vault_salt.clone(),
                    user.display_name.clone(),
                    user.email.clone(),
                    user.is_admin as i64,
                    user.updated_at.to_string(),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn delete(&self, user_id: &WrappedUuidV4) -> Result<(), CommonError> {
        self.conn
            .execute("DELETE FROM users WHERE user_id = ?1", libsql::params![user_id.to_string()])
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn list(&self, pagination: &PaginationRequest) -> Result<PaginatedResponse<User>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT user_id, username, password_hash, status, vault_salt, display_name,
                        email, is_admin, created_at, updated_at
                 FROM users ORDER BY user_id LIMIT ?1",
                libsql::params![pagination.page_size + 1],
            )
            .await
            .map_err(CommonError::from)?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(CommonError::from)? {
            items.push(row_to_user(&row)?);
        }

        Ok(PaginatedResponse::from_items_with_extra(items, pagination, |u| {
            vec![u.user_id.to_string()]
        }))
    }
}

fn row_to_client(row: &libsql::Row) -> Result<Client, CommonError> {
    let client_id: String = row.get(0).map_err(CommonError::from)?;
    let client_name: String = row.get(1).map_err(CommonError::from)?;
    let key_prefix: String = row.get(2).map_err(CommonError::from)?;
    let key_hash: String = row.get(3).map_err(CommonError::from)?;
    let user_id: String = row.get(4).map_err(CommonError::from)?;
    let profile_id: String = row.get(5).map_err(CommonError::from)?;
    let status: String = row.get(6).map_err(CommonError::from)?;
    let created_at: String = row.get(7).map_err(CommonError::from)?;
    let expires_at: Option<String> = row.get(8).map_err(CommonError::from)?;
    let last_used_at: Option<String> = row.get(9).map_err(CommonError::from)?;
    let metadata: String = row.get(10).map_err(CommonError::from)?;

    Ok(Client {
        client_id: WrappedUuidV4::try_from(client_id).map_err(CommonError::from)?,
        client_name,
        key_prefix,
        key_hash,
        user_id: WrappedUuidV4::try_from(user_id).map_err(CommonError::from)?,
        profile_id: WrappedUuidV4::try_from(profile_id).map_err(CommonError::from)?,
        status: parse_client_status(&status)?,
        created_at: WrappedChronoDateTime::try_from(created_at.as_str()).map_err(CommonError::from)?,
        expires_at: expires_at
            .map(|s| WrappedChronoDateTime::try_from(s.as_str()))
            .transpose()
            .map_err(CommonError::from)?,
        last_used_at: last_used_at
            .map(|s| WrappedChronoDateTime::try_from(s.as_str()))
            .transpose()
            .map_err(CommonError::from)?,
        metadata: WrappedJsonValue::new(serde_json::from_str(&metadata).map_err(CommonError::from)?),
    })
}

#[async_trait]
impl ClientRepositoryLike for Repository {
    async fn create(&self, client: &Client) -> Result<(), CommonError> {
        self.conn
            .execute(
                "INSERT INTO clients (
                    client_id, client_name, key_prefix, key_hash, user_id, profile_id,
                    status, created_at, expires_at, last_used_at, metadata
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                libsql::params![
                    client.client_id.to_string(),
                    client.client_name.clone(),
                    client.key_prefix.clone(),
                    client.key_hash.clone(),
                    client.user_id.to_string(),
                    client.profile_id.to_string(),
                    client_status_str(client.status),
                    client.created_at.to_string(),
                    client.expires_at.as_ref().map(|t| t.to_string()),
                    client.last_used_at.as_ref().map(|t| t.to_string()),
                    serde_json::to_string(client.metadata.get_inner()).map_err(CommonError::from)?,
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn get_by_id(&self, client_id: &WrappedUuidV4) -> Result<Client, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT client_id, client_name, key_prefix, key_hash, user_id, profile_id,
                        status, created_at, expires_at, last_used_at, metadata
                 FROM clients WHERE client_id = ?1",
                libsql::params![client_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;

        match rows.next().await.map_err(CommonError::from)? {
            Some(row) => row_to_client(&row),
            None => Err(not_found("client", &client_id.to_string())),
        }
    }

    async fn list_for_user(
        &self,
        user_id: &WrappedUuidV4,
        pagination: &PaginationRequest,
    ) -> Result<PaginatedResponse<Client>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT client_id, client_name, key_prefix, key_hash, user_id, profile_id,
                        status, created_at, expires_at, last_used_at, metadata
                 FROM clients WHERE user_id = ?1 ORDER BY client_id LIMIT ?2",
                libsql::params![user_id.to_string(), pagination.page_size + 1],
            )
            .await
            .map_err(CommonError::from)?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(CommonError::from)? {
            items.push(row_to_client(&row)?);
        }

        Ok(PaginatedResponse::from_items_with_extra(items, pagination, |c| {
            vec![c.client_id.to_string()]
        }))
    }

    async fn update(&self, client: &Client) -> Result<(), CommonError> {
        self.conn
            .execute(
                "UPDATE clients SET client_name = ?2, profile_id = ?3, status = ?4,
                    expires_at = ?5, metadata = ?6
                 WHERE client_id = ?1",
                libsql::params![
                    client.client_id.to_string(),
                    client.client_name.clone(),
                    client.profile_id.to_string(),
                    client_status_str(client.status),
                    client.expires_at.as_ref().map(|t| t.to_string()),
                    serde_json::to_string(client.metadata.get_inner()).map_err(CommonError::from)?,
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn delete(&self, client_id: &WrappedUuidV4) -> Result<(), CommonError> {
        self.conn
            .execute("DELETE FROM clients WHERE client_id = ?1", libsql::params![client_id.to_string()])
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn touch_last_used(&self, client_id: &WrappedUuidV4) {
        let now = WrappedChronoDateTime::now().to_string();
        if let Err(e) = self
            .conn
            .execute(
                "UPDATE clients SET last_used_at = ?2 WHERE client_id = ?1",
                libsql::params![client_id.to_string(), now],
            )
            .await
        {
            tracing::warn!(error = ?e, client_id = %client_id, "failed to touch client last_used_at");
        }
    }
}

fn row_to_admin_key(row: &libsql::Row) -> Result<AdminKey, CommonError> {
    let id: String = row.get(0).map_err(CommonError::from)?;
    let key_hash: String = row.get(1).map_err(CommonError::from)?;
    let recovery_token_hash: String = row.get(2).map_err(CommonError::from)?;
    let is_active: i64 = row.get(3).map_err(CommonError::from)?;
    let created_at: String = row.get(4).map_err(CommonError::from)?;
    let rotated_at: Option<String> = row.get(5).map_err(CommonError::from)?;

    Ok(AdminKey {
        id: WrappedUuidV4::try_from(id).map_err(CommonError::from)?,
        key_hash,
        recovery_token_hash,
        is_active: is_active != 0,
        created_at: WrappedChronoDateTime::try_from(created_at.as_str()).map_err(CommonError::from)?,
        rotated_at: rotated_at
            .map(|s| WrappedChronoDateTime::try_from(s.as_str()))
            .transpose()
            .map_err(CommonError::from)?,
    })
}

#[async_trait]
impl AdminKeyRepositoryLike for Repository {
    async fn get_active(&self) -> Result<Option<AdminKey>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, key_hash, recovery_token_hash, is_active, created_at, rotated_at
                 FROM admin_keys WHERE is_active = 1 LIMIT 1",
                (),
            )
            .await
            .map_err(CommonError::from)?;

        match rows.next().await.map_err(CommonError::from)? {
            Some(row) => Ok(Some(row_to_admin_key(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_by_id(&self, id: &WrappedUuidV4) -> Result<AdminKey, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, key_hash, recovery_token_hash, is_active, created_at, rotated_at
                 FROM admin_keys WHERE id = ?1",
                libsql::params![id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;

        match rows.next().await.map_err(CommonError::from)? {
            Some(row) => row_to_admin_key(&row),
            None => Err(not_found("admin_key", &id.to_string())),
        }
    }

    async fn insert(&self, key: &AdminKey) -> Result<(), CommonError> {
        self.conn
            .execute(
                "INSERT INTO admin_keys (id, key_hash, recovery_token_hash, is_active, created_at, rotated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                libsql::params![
                    key.id.to_string(),
                    key.key_hash.clone(),
                    key.recovery_token_hash.clone(),
                    key.is_active as i64,
                    key.created_at.to_string(),
                    key.rotated_at.as_ref().map(|t| t.to_string()),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn update(&self, key: &AdminKey) -> Result<(), CommonError> {
        self.conn
            .execute(
                "UPDATE admin_keys SET key_hash = ?2, recovery_token_hash = ?3, is_active = ?4,
                    rotated_at = ?5
                 WHERE id = ?1",
                libsql::params![
                    key.id.to_string(),
                    key.key_hash.clone(),
                    key.recovery_token_hash.clone(),
                    key.is_active as i64,
                    key.rotated_at.as_ref().map(|t| t.to_string()),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn deactivate_all(&self) -> Result<(), CommonError> {
        self.conn
            .execute("UPDATE admin_keys SET is_active = 0", ())
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }
}

fn row_to_tool_profile(row: &libsql::Row) -> Result<ToolProfile, CommonError> {
    let profile_id: String = row.get(0).map_err(CommonError::from)?;
    let name: String = row.get(1).map_err(CommonError::from)?;
    let description: String = row.get(2).map_err(CommonError::from)?;
    let allowed_tools: String = row.get(3).map_err(CommonError::from)?;
    let denied_tools: String = row.get(4).map_err(CommonError::from)?;
    let rpm: Option<i64> = row.get(5).map_err(CommonError::from)?;
    let rph: Option<i64> = row.get(6).map_err(CommonError::from)?;
    let max_concurrent: Option<i64> = row.get(7).map_err(CommonError::from)?;
    let inherited_from: Option<String> = row.get(8).map_err(CommonError::from)?;
    let environment_scope: Option<String> = row.get(9).map_err(CommonError::from)?;
    let allowed_hours_start: Option<i64> = row.get(10).map_err(CommonError::from)?;
    let allowed_hours_end: Option<i64> = row.get(11).map_err(CommonError::from)?;

    Ok(ToolProfile {
        profile_id: WrappedUuidV4::try_from(profile_id).map_err(CommonError::from)?,
        name,
        description,
        allowed_tools: serde_json::from_str(&allowed_tools).map_err(CommonError::from)?,
        denied_tools: serde_json::from_str(&denied_tools).map_err(CommonError::from)?,
        rate_limits: RateLimits {
            rpm: rpm.map(|v| v as u32),
            rph: rph.map(|v| v as u32),
            max_concurrent: max_concurrent.map(|v| v as u32),
        },
        inherited_from: inherited_from
            .map(WrappedUuidV4::try_from)
            .transpose()
            .map_err(CommonError::from)?,
        environment_scope,
        time_restrictions: TimeRestrictions {
            allowed_hours_utc: match (allowed_hours_start, allowed_hours_end) {
                (Some(start), Some(end)) => Some((start as u8, end as u8)),
                _ => None,
            },
        },
    })
}

#[async_trait]
impl ToolProfileRepositoryLike for Repository {
    async fn create(&self, profile: &ToolProfile) -> Result<(), CommonError> {
        self.conn
            .execute(
                "INSERT INTO tool_profiles (
                    profile_id, name, description, allowed_tools, denied_tools,
                    rate_limit_rpm, rate_limit_rph, rate_limit_max_concurrent,
                    inherited_from, environment_scope, allowed_hours_start, allowed_hours_end
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                libsql::params![
                    profile.profile_id.to_string(),
                    profile.name.clone(),
                    profile.description.clone(),
                    serde_json::to_string(&profile.allowed_tools).map_err(CommonError::from)?,
                    serde_json::to_string(&profile.denied_tools).map_err(CommonError::from)?,
                    profile.rate_limits.rpm.map(|v| v as i64),
                    profile.rate_limits.rph.map(|v| v as i64),
                    profile.rate_limits.max_concurrent.map(|v| v as i64),
                    profile.inherited_from.as_ref().map(|id| id.to_string()),
                    profile.environment_scope.clone(),
                    profile.time_restrictions.allowed_hours_utc.map(|(s, _)| s as i64),
                    profile.time_restrictions.allowed_hours_utc.map(|(_, e)| e as i64),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn get_by_id(&self, profile_id: &WrappedUuidV4) -> Result<ToolProfile, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT profile_id, name, description, allowed_tools, denied_tools,
                        rate_limit_rpm, rate_limit_rph, rate_limit_max_concurrent,
                        inherited_from, environment_scope, allowed_hours_start, allowed_hours_end
                 FROM tool_profiles WHERE profile_id = ?1",
                libsql::params![profile_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;

        match rows.next().await.map_err(CommonError::from)? {
            Some(row) => row_to_tool_profile(&row),
            None => Err(not_found("tool_profile", &profile_id.to_string())),
        }
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<ToolProfile>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT profile_id, name, description, allowed_tools, denied_tools,
                        rate_limit_rpm, rate_limit_rph, rate_limit_max_concurrent,
                        inherited_from, environment_scope, allowed_hours_start, allowed_hours_end
                 FROM tool_profiles WHERE name = ?1",
                libsql::params![name.to_string()],
            )
            .await
            .map_err(CommonError::from)?;

        match rows.next().await.map_err(CommonError::from)? {
            Some(row) => Ok(Some(row_to_tool_profile(&row)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, profile: &ToolProfile) -> Result<(), CommonError> {
        self.conn
            .execute(
                "UPDATE tool_profiles SET name = ?2, description = ?3, allowed_tools = ?4,
                    denied_tools = ?5, rate_limit_rpm = ?6, rate_limit_rph = ?7,
                    rate_limit_max_concurrent = ?8, inherited_from = ?9, environment_scope = ?10,
                    allowed_hours_start = ?11, allowed_hours_end = ?12
                 WHERE profile_id = ?1",
                libsql::params![
                    profile.profile_id.to_string(),
                    profile.name.clone(),
                    profile.description.clone(),
                    serde_json::to_string(&profile.allowed_tools).map_err(CommonError::from)?,
                    serde_json::to_string(&profile.denied_tools).map_err(CommonError::from)?,
                    profile.rate_limits.rpm.map(|v| v as i64),
                    profile.rate_limits.rph.map(|v| v as i64),
                    profile.rate_limits.max_concurrent.map(|v| v as i64),
                    profile.inherited_from.as_ref().map(|id| id.to_string()),
                    profile.environment_scope.clone(),
                    profile.time_restrictions.allowed_hours_utc.map(|(s, _)| s as i64),
                    profile.time_restrictions.allowed_hours_utc.map(|(_, e)| e as i64),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn delete(&self, profile_id: &WrappedUuidV4) -> Result<(), CommonError> {
        self.conn
            .execute(
                "DELETE FROM tool_profiles WHERE profile_id = ?1",
                libsql::params![profile_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn list(&self, pagination: &PaginationRequest) -> Result<PaginatedResponse<ToolProfile>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT profile_id, name, description, allowed_tools, denied_tools,
                        rate_limit_rpm, rate_limit_rph, rate_limit_max_concurrent,
                        inherited_from, environment_scope, allowed_hours_start, allowed_hours_end
                 FROM tool_profiles ORDER BY profile_id LIMIT ?1",
                libsql::params![pagination.page_size + 1],
            )
            .await
            .map_err(CommonError::from)?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(CommonError::from)? {
            items.push(row_to_tool_profile(&row)?);
        }

        Ok(PaginatedResponse::from_items_with_extra(items, pagination, |p| {
            vec![p.profile_id.to_string()]
        }))
    }
}

fn row_to_group(row: &libsql::Row) -> Result<Group, CommonError> {
    let group_id: String = row.get(0).map_err(CommonError::from)?;
    let name: String = row.get(1).map_err(CommonError::from)?;
    let description: String = row.get(2).map_err(CommonError::from)?;
    let status: String = row.get(3).map_err(CommonError::from)?;

    Ok(Group {
        group_id: WrappedUuidV4::try_from(group_id).map_err(CommonError::from)?,
        name,
        description,
        status: parse_group_status(&status)?,
    })
}

#[async_trait]
impl GroupRepositoryLike for Repository {
    async fn create(&self, group: &Group) -> Result<(), CommonError> {
        self.conn
            .execute(
                "INSERT INTO groups (group_id, name, description, status) VALUES (?1, ?2, ?3, ?4)",
                libsql::params![
                    group.group_id.to_string(),
                    group.name.clone(),
                    group.description.clone(),
                    group_status_str(group.status),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn get_by_id(&self, group_id: &WrappedUuidV4) -> Result<Group, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT group_id, name, description, status FROM groups WHERE group_id = ?1",
                libsql::params![group_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;

        match rows.next().await.map_err(CommonError::from)? {
            Some(row) => row_to_group(&row),
            None => Err(not_found("group", &group_id.to_string())),
        }
    }

    async fn update(&self, group: &Group) -> Result<(), CommonError> {
        self.conn
            .execute(
                "UPDATE groups SET name = ?2, description = ?3, status = ?4 WHERE group_id = ?1",
                libsql::params![
                    group.group_id.to_string(),
                    group.name.clone(),
                    group.description.clone(),
                    group_status_str(group.status),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn delete(&self, group_id: &WrappedUuidV4) -> Result<(), CommonError> {
        self.conn
            .execute("DELETE FROM groups WHERE group_id = ?1", libsql::params![group_id.to_string()])
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn list(&self, pagination: &PaginationRequest) -> Result<PaginatedResponse<Group>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT group_id, name, description, status FROM groups ORDER BY group_id LIMIT ?1",
                libsql::params![pagination.page_size + 1],
            )
            .await
            .map_err(CommonError::from)?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(CommonError::from)? {
            items.push(row_to_group(&row)?);
        }

        Ok(PaginatedResponse::from_items_with_extra(items, pagination, |g| {
            vec![g.group_id.to_string()]
        }))
    }

    async fn add_user_member(&self, group_id: &WrappedUuidV4, user_id: &WrappedUuidV4) -> Result<(), CommonError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO user_group_members (group_id, user_id) VALUES (?1, ?2)",
                libsql::params![group_id.to_string(), user_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn remove_user_member(&self, group_id: &WrappedUuidV4, user_id: &WrappedUuidV4) -> Result<(), CommonError> {
        self.conn
            .execute(
                "DELETE FROM user_group_members WHERE group_id = ?1 AND user_id = ?2",
                libsql::params![group_id.to_string(), user_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn add_mcp_member(&self, group_id: &WrappedUuidV4, mcp_id: &WrappedUuidV4) -> Result<(), CommonError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO mcp_group_members (group_id, mcp_id) VALUES (?1, ?2)",
                libsql::params![group_id.to_string(), mcp_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn remove_mcp_member(&self, group_id: &WrappedUuidV4, mcp_id: &WrappedUuidV4) -> Result<(), CommonError> {
        self.conn
            .execute(
                "DELETE FROM mcp_group_members WHERE group_id = ?1 AND mcp_id = ?2",
                libsql::params![group_id.to_string(), mcp_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: &WrappedUuidV4) -> Result<Vec<Group>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT g.group_id, g.name, g.description, g.status
                 FROM groups g
                 JOIN user_group_members ugm ON ugm.group_id = g.group_id
                 WHERE ugm.user_id = ?1 AND g.status = 'active'",
                libsql::params![user_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(CommonError::from)? {
            items.push(row_to_group(&row)?);
        }
        Ok(items)
    }

    async fn user_has_group_access(
        &self,
        user_id: &WrappedUuidV4,
        mcp_id: &WrappedUuidV4,
    ) -> Result<bool, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1
                 FROM user_group_members ugm
                 JOIN mcp_group_members mgm ON mgm.group_id = ugm.group_id
                 JOIN groups g ON g.group_id = ugm.group_id
                 WHERE ugm.user_id = ?1 AND mgm.mcp_id = ?2 AND g.status = 'active'
                 LIMIT 1",
                libsql::params![user_id.to_string(), mcp_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;

        Ok(rows.next().await.map_err(CommonError::from)?.is_some())
    }
}

fn row_to_session(row: &libsql::Row) -> Result<UserSession, CommonError> {
    let session_id: String = row.get(0).map_err(CommonError::from)?;
    let user_id: String = row.get(1).map_err(CommonError::from)?;
    let client_id: Option<String> = row.get(2).map_err(CommonError::from)?;
    let status: String = row.get(3).map_err(CommonError::from)?;
    let issued_at: String = row.get(4).map_err(CommonError::from)?;
    let expires_at: String = row.get(5).map_err(CommonError::from)?;
    let hmac_signature: String = row.get(6).map_err(CommonError::from)?;

    Ok(UserSession {
        session_id: WrappedUuidV4::try_from(session_id).map_err(CommonError::from)?,
        user_id: WrappedUuidV4::try_from(user_id).map_err(CommonError::from)?,
        client_id: client_id.map(WrappedUuidV4::try_from).transpose().map_err(CommonError::from)?,
        status: parse_session_status(&status)?,
        issued_at: WrappedChronoDateTime::try_from(issued_at.as_str()).map_err(CommonError::from)?,
        expires_at: WrappedChronoDateTime::try_from(expires_at.as_str()).map_err(CommonError::from)?,
        hmac_signature,
    })
}

#[async_trait]
impl SessionRepositoryLike for Repository {
    async fn insert(&self, session: &UserSession) -> Result<(), CommonError> {
        self.conn
            .execute(
                "INSERT INTO user_sessions (
                    session_id, user_id, client_id, status, issued_at, expires_at, hmac_signature
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                libsql::params![
                    session.session_id.to_string(),
                    session.user_id.to_string(),
                    session.client_id.as_ref().map(|id| id.to_string()),
                    session_status_str(session.status),
                    session.issued_at.to_string(),
                    session.expires_at.to_string(),
                    session.hmac_signature.clone(),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn get_by_id(&self, session_id: &WrappedUuidV4) -> Result<UserSession, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT session_id, user_id, client_id, status, issued_at, expires_at, hmac_signature
                 FROM user_sessions WHERE session_id = ?1",
                libsql::params![session_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;

        match rows.next().await.map_err(CommonError::from)? {
            Some(row) => row_to_session(&row),
            None => Err(not_found("session", &session_id.to_string())),
        }
    }

    async fn update(&self, session: &UserSession) -> Result<(), CommonError> {
        self.conn
            .execute(
                "UPDATE user_sessions SET status = ?2, expires_at = ?3, hmac_signature = ?4
                 WHERE session_id = ?1",
                libsql::params![
                    session.session_id.to_string(),
                    session_status_str(session.status),
                    session.expires_at.to_string(),
                    session.hmac_signature.clone(),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn delete(&self, session_id: &WrappedUuidV4) -> Result<(), CommonError> {
        self.conn
            .execute(
                "DELETE FROM user_sessions WHERE session_id = ?1",
                libsql::params![session_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }
}
