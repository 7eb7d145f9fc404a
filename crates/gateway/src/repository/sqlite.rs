//! Sqlite-backed implementation of the gateway crate's repository traits,
//! following the row-mapping style of `identity::repository::sqlite`.

use async_trait::async_trait;
use shared::error::CommonError;
use shared::libsql::Connection;
use shared::primitives::{
    PaginatedResponse, PaginationRequest, WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4,
};

use crate::model::{
    AuthType, IsolationMode, McpCatalogEntry, McpStatus, Subscription, SubscriptionStatus,
    TransportType, UserMcpCredential, ValidationStatus,
};
use crate::repository::{CredentialRepositoryLike, McpCatalogRepositoryLike, SubscriptionRepositoryLike};

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
    CommonError::NotFound { msg: format!("{entity} {id} not found"), lookup_id: id.to_string(), source: None }
}

fn transport_type_str(t: TransportType) -> &'static str {
    match t {
        TransportType::Stdio => "stdio",
        TransportType::Http => "http",
        TransportType::Sse => "sse",
    }
}

fn parse_transport_type(s: &str) -> Result<TransportType, CommonError> {
    Ok(match s {
        "stdio" => TransportType::Stdio,
        "http" => TransportType::Http,
        "sse" => TransportType::Sse,
        other => return Err(CommonError::Internal { source: anyhow::anyhow!("unknown transport_type in row: {other}") }),
    })
}

fn isolation_mode_str(m: IsolationMode) -> &'static str {
    match m {
        IsolationMode::Shared => "shared",
        IsolationMode::PerUser => "per_user",
    }
}

fn parse_isolation_mode(s: &str) -> Result<IsolationMode, CommonError> {
    Ok(match s {
        "shared" => IsolationMode::Shared,
        "per_user" => IsolationMode::PerUser,
        other => return Err(CommonError::Internal { source: anyhow::anyhow!("unknown isolation_mode in row: {other}") }),
    })
}

fn validation_status_str(s: ValidationStatus) -> &'static str {
    match s {
        ValidationStatus::Pending => "pending",
        ValidationStatus::Valid => "valid",
        ValidationStatus::Invalid => "invalid",
    }
}

fn parse_validation_status(s: &str) -> Result<ValidationStatus, CommonError> {
    Ok(match s {
        "pending" => ValidationStatus::Pending,
        "valid" => ValidationStatus::Valid,
        "invalid" => ValidationStatus::Invalid,
        other => return Err(CommonError::Internal { source: anyhow::anyhow!("unknown validation_status in row: {other}") }),
    })
}

fn mcp_status_str(s: McpStatus) -> &'static str {
    match s {
        McpStatus::Draft => "draft",
        McpStatus::Published => "published",
        McpStatus::Archived => "archived",
    }
}

fn parse_mcp_status(s: &str) -> Result<McpStatus, CommonError> {
    Ok(match s {
        "draft" => McpStatus::Draft,
        "published" => McpStatus::Published,
        "archived" => McpStatus::Archived,
        other => return Err(CommonError::Internal { source: anyhow::anyhow!("unknown mcp status in row: {other}") }),
    })
}

fn auth_type_str(a: AuthType) -> &'static str {
    match a {
        AuthType::None => "none",
        AuthType::Static => "static",
        AuthType::Oauth2 => "oauth2",
    }
}

fn parse_auth_type(s: &str) -> Result<AuthType, CommonError> {
    Ok(match s {
        "none" => AuthType::None,
        "static" => AuthType::Static,
        "oauth2" => AuthType::Oauth2,
        other => return Err(CommonError::Internal { source: anyhow::anyhow!("unknown auth_type in row: {other}") }),
    })
}

fn row_to_mcp_entry(row: &libsql::Row) -> Result<McpCatalogEntry, CommonError> {
    let mcp_id: String = row.get(0).map_err(CommonError::from)?;
    let name: String = row.get(1).map_err(CommonError::from)?;
    let display_name: String = row.get(2).map_err(CommonError::from)?;
    let description: String = row.get(3).map_err(CommonError::from)?;
    let transport_type: String = row.get(4).map_err(CommonError::from)?;
    let config: String = row.get(5).map_err(CommonError::from)?;
    let isolation_mode: String = row.get(6).map_err(CommonError::from)?;
    let requires_user_credentials: i64 = row.get(7).map_err(CommonError::from)?;
    let credential_schema: Option<String> = row.get(8).map_err(CommonError::from)?;
    let tool_catalog: String = row.get(9).map_err(CommonError::from)?;
    let validation_status: String = row.get(10).map_err(CommonError::from)?;
    let status: String = row.get(11).map_err(CommonError::from)?;
    let auth_type: String = row.get(12).map_err(CommonError::from)?;
    let oauth_config: Option<String> = row.get(13).map_err(CommonError::from)?;
    let created_at: String = row.get(14).map_err(CommonError::from)?;
    let updated_at: String = row.get(15).map_err(CommonError::from)?;
    let timeout_seconds: Option<i64> = row.get(16).map_err(CommonError::from)?;

    Ok(McpCatalogEntry {
        mcp_id: WrappedUuidV4::try_from(mcp_id).map_err(CommonError::from)?,
        name,
        display_name,
        description,
        transport_type: parse_transport_type(&transport_type)?,
        config: WrappedJsonValue::new(serde_json::from_str(&config).map_err(CommonError::from)?),
        isolation_mode: parse_isolation_mode(&isolation_mode)?,
        requires_user_credentials: requires_user_credentials != 0,
        credential_schema: credential_schema
            .map(|s| -> Result<WrappedJsonValue, CommonError> {
                Ok(WrappedJsonValue::new(serde_json::from_str(&s).map_err(CommonError::from)?))
            })
            .transpose()?,
        tool_catalog: WrappedJsonValue::new(serde_json::from_str(&tool_catalog).map_err(CommonError::from)?),
        validation_status: parse_validation_status(&validation_status)?,
        status: parse_mcp_status(&status)?,
        auth_type: parse_auth_type(&auth_type)?,
        oauth_config: oauth_config
            .map(|s| -> Result<WrappedJsonValue, CommonError> {
                Ok(WrappedJsonValue::new(serde_json::from_str(&s).map_err(CommonError::from)?))
            })
            .transpose()?,
        created_at: WrappedChronoDateTime::try_from(created_at.as_str()).map_err(CommonError::from)?,
        updated_at: WrappedChronoDateTime::try_from(updated_at.as_str()).map_err(CommonError::from)?,
        timeout_seconds: timeout_seconds.map(|v| v as u64),
    })
}

#[async_trait]
impl McpCatalogRepositoryLike for Repository {
    async fn create(&self, entry: &McpCatalogEntry) -> Result<(), CommonError> {
        self.conn
            .execute(
                "INSERT INTO mcp_catalog_entries (
                    mcp_id, name, display_name, description, transport_type, config,
                    isolation_mode, requires_user_credentials, credential_schema, tool_catalog,
                    validation_status, status, auth_type, oauth_config, created_at, updated_at,
                    timeout_seconds
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
                libsql::params![
                    entry.mcp_id.to_string(),
                    entry.name.clone(),
                    entry.display_name.clone(),
                    entry.description.clone(),
                    transport_type_str(entry.transport_type),
                    serde_json::to_string(entry.config.get_inner()).map_err(CommonError::from)?,
                    isolation_mode_str(entry.isolation_mode),
                    entry.requires_user_credentials as i64,
                    entry
                        .credential_schema
                        .as_ref()
                        .map(|v| serde_json::to_string(v.get_inner()))
                        .transpose()
                        .map_err(CommonError::from)?,
                    serde_json::to_string(entry.tool_catalog.get_inner()).map_err(CommonError::from)?,
                    validation_status_str(entry.validation_status),
                    mcp_status_str(entry.status),
                    auth_type_str(entry.auth_type),
                    entry
                        .oauth_config
                        .as_ref()
                        .map(|v| serde_json::to_string(v.get_inner()))
                        .transpose()
                        .map_err(CommonError::from)?,
                    entry.created_at.to_string(),
                    entry.updated_at.to_string(),
                    entry.timeout_seconds.map(|v| v as i64),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn get_by_id(&self, mcp_id: &WrappedUuidV4) -> Result<McpCatalogEntry, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT mcp_id, name, display_name, description, transport_type, config,
                        isolation_mode, requires_user_credentials, credential_schema, tool_catalog,
                        validation_status, status, auth_type, oauth_config, created_at, updated_at,
                        timeout_seconds
                 FROM mcp_catalog_entries WHERE mcp_id = ?1",
                libsql::params![mcp_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        match rows.next().await.map_err(CommonError::from)? {
            Some(row) => row_to_mcp_entry(&row),
            None => Err(not_found("mcp_catalog_entry", &mcp_id.to_string())),
        }
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<McpCatalogEntry>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT mcp_id, name, display_name, description, transport_type, config,
                        isolation_mode, requires_user_credentials, credential_schema, tool_catalog,
                        validation_status, status, auth_type, oauth_config, created_at, updated_at,
                        timeout_seconds
                 FROM mcp_catalog_entries WHERE name = ?1",
                libsql::params![name.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        match rows.next().await.map_err(CommonError::from)? {
            Some(row) => Ok(Some(row_to_mcp_entry(&row)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, entry: &McpCatalogEntry) -> Result<(), CommonError> {
        self.conn
            .execute(
                "UPDATE mcp_catalog_entries SET
                    name = ?2, display_name = ?3, description = ?4, transport_type = ?5, config = ?6,
                    isolation_mode = ?7, requires_user_credentials = ?8, credential_schema = ?9,
                    tool_catalog = ?10, validation_status = ?11, status = ?12, auth_type = ?13,
                    oauth_config = ?14, updated_at = ?15, timeout_seconds = ?16
                 WHERE mcp_id = ?1",
                libsql::params![
                    entry.mcp_id.to_string(),
                    entry.name.clone(),
                    entry.display_name.clone(),
                    entry.description.clone(),
                    transport_type_str(entry.transport_type),
                    serde_json::to_string(entry.config.get_inner()).map_err(CommonError::from)?,
                    isolation_mode_str(entry.isolation_mode),
                    entry.requires_user_credentials as i64,
                    entry
                        .credential_schema
                        .as_ref()
                        .map(|v| serde_json::to_string(v.get_inner()))
                        .transpose()
                        .map_err(CommonError::from)?,
                    serde_json::to_string(entry.tool_catalog.get_inner()).map_err(CommonError::from)?,
                    validation_status_str(entry.validation_status),
                    mcp_status_str(entry.status),
                    auth_type_str(entry.auth_type),
                    entry
                        .oauth_config
                        .as_ref()
                        .map(|v| serde_json::to_string(v.get_inner()))
                        .transpose()
                        .map_err(CommonError::from)?,
                    entry.updated_at.to_string(),
                    entry.timeout_seconds.map(|v| v as i64),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn delete(&self, mcp_id: &WrappedUuidV4) -> Result<(), CommonError> {
        self.conn
            .execute("DELETE FROM mcp_catalog_entries WHERE mcp_id = ?1", libsql::params![mcp_id.to_string()])
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn list(
        &self,
        pagination: &PaginationRequest,
    ) -> Result<PaginatedResponse<McpCatalogEntry>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT mcp_id, name, display_name, description, transport_type, config,
                        isolation_mode, requires_user_credentials, credential_schema, tool_catalog,
                        validation_status, status, auth_type, oauth_config, created_at, updated_at,
                        timeout_seconds
                 FROM mcp_catalog_entries ORDER BY mcp_id LIMIT ?1",
                libsql::params![pagination.page_size + 1],
            )
            .await
            .map_err(CommonError::from)?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(CommonError::from)? {
            items.push(row_to_mcp_entry(&row)?);
        }
        Ok(PaginatedResponse::from_items_with_extra(items, pagination, |e| vec![e.mcp_id.to_string()]))
    }

    async fn list_by_status(&self, status: McpStatus) -> Result<Vec<McpCatalogEntry>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT mcp_id, name, display_name, description, transport_type, config,
                        isolation_mode, requires_user_credentials, credential_schema, tool_catalog,
                        validation_status, status, auth_type, oauth_config, created_at, updated_at,
                        timeout_seconds
                 FROM mcp_catalog_entries WHERE status = ?1 ORDER BY name",
                libsql::params![mcp_status_str(status)],
            )
            .await
            .map_err(CommonError::from)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(CommonError::from)? {
            items.push(row_to_mcp_entry(&row)?);
        }
        Ok(items)
    }
}

fn subscription_status_str(s: SubscriptionStatus) -> &'static str {
    match s {
        SubscriptionStatus::Active => "active",
        SubscriptionStatus::Paused => "paused",
    }
}

fn parse_subscription_status(s: &str) -> Result<SubscriptionStatus, CommonError> {
    Ok(match s {
        "active" => SubscriptionStatus::Active,
        "paused" => SubscriptionStatus::Paused,
        other => return Err(CommonError::Internal { source: anyhow::anyhow!("unknown subscription status in row: {other}") }),
    })
}

fn row_to_subscription(row: &libsql::Row) -> Result<Subscription, CommonError> {
    let subscription_id: String = row.get(0).map_err(CommonError::from)?;
    let client_id: String = row.get(1).map_err(CommonError::from)?;
    let mcp_id: String = row.get(2).map_err(CommonError::from)?;
    let selected_tools: String = row.get(3).map_err(CommonError::from)?;
    let status: String = row.get(4).map_err(CommonError::from)?;
    let subscribed_at: String = row.get(5).map_err(CommonError::from)?;
    let updated_at: String = row.get(6).map_err(CommonError::from)?;

    Ok(Subscription {
        subscription_id: WrappedUuidV4::try_from(subscription_id).map_err(CommonError::from)?,
        client_id: WrappedUuidV4::try_from(client_id).map_err(CommonError::from)?,
        mcp_id: WrappedUuidV4::try_from(mcp_id).map_err(CommonError::from)?,
        selected_tools: serde_json::from_str(&selected_tools).map_err(CommonError::from)?,
        status: parse_subscription_status(&status)?,
        subscribed_at: WrappedChronoDateTime::try_from(subscribed_at.as_str()).map_err(CommonError::from)?,
        updated_at: WrappedChronoDateTime::try_from(updated_at.as_str()).map_err(CommonError::from)?,
    })
}

#[async_trait]
impl SubscriptionRepositoryLike for Repository {
    async fn create(&self, sub: &Subscription) -> Result<(), CommonError> {
        self.conn
            .execute(
                "INSERT INTO subscriptions (
                    subscription_id, client_id, mcp_id, selected_tools, status, subscribed_at, updated_at
                ) VALUES (?1,?2,?3,?4,?5,?6,?7)",
                libsql::params![
                    sub.subscription_id.to_string(),
                    sub.client_id.to_string(),
                    sub.mcp_id.to_string(),
                    serde_json::to_string(&sub.selected_tools).map_err(CommonError::from)?,
                    subscription_status_str(sub.status),
                    sub.subscribed_at.to_string(),
                    sub.updated_at.to_string(),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn get_by_id(&self, subscription_id: &WrappedUuidV4) -> Result<Subscription, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT subscription_id, client_id, mcp_id, selected_tools, status, subscribed_at, updated_at
                 FROM subscriptions WHERE subscription_id = ?1",
                libsql::params![subscription_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        match rows.next().await.map_err(CommonError::from)? {
            Some(row) => row_to_subscription(&row),
            None => Err(not_found("subscription", &subscription_id.to_string())),
        }
    }

    async fn update(&self, sub: &Subscription) -> Result<(), CommonError> {
        self.conn
            .execute(
                "UPDATE subscriptions SET selected_tools = ?2, status = ?3, updated_at = ?4
                 WHERE subscription_id = ?1",
                libsql::params![
                    sub.subscription_id.to_string(),
                    serde_json::to_string(&sub.selected_tools).map_err(CommonError::from)?,
                    subscription_status_str(sub.status),
                    sub.updated_at.to_string(),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn delete(&self, subscription_id: &WrappedUuidV4) -> Result<(), CommonError> {
        self.conn
            .execute(
                "DELETE FROM subscriptions WHERE subscription_id = ?1",
                libsql::params![subscription_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn list_for_client(&self, client_id: &WrappedUuidV4) -> Result<Vec<Subscription>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT subscription_id, client_id, mcp_id, selected_tools, status, subscribed_at, updated_at
                 FROM subscriptions WHERE client_id = ?1 ORDER BY subscribed_at",
                libsql::params![client_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(CommonError::from)? {
            items.push(row_to_subscription(&row)?);
        }
        Ok(items)
    }

    async fn list_active_for_client(&self, client_id: &WrappedUuidV4) -> Result<Vec<Subscription>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT subscription_id, client_id, mcp_id, selected_tools, status, subscribed_at, updated_at
                 FROM subscriptions WHERE client_id = ?1 AND status = 'active' ORDER BY subscribed_at",
                libsql::params![client_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(CommonError::from)? {
            items.push(row_to_subscription(&row)?);
        }
        Ok(items)
    }

    async fn list_for_user(&self, user_id: &WrappedUuidV4) -> Result<Vec<Subscription>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT s.subscription_id, s.client_id, s.mcp_id, s.selected_tools, s.status, s.subscribed_at, s.updated_at
                 FROM subscriptions s JOIN clients c ON c.client_id = s.client_id
                 WHERE c.user_id = ?1 ORDER BY s.subscribed_at",
                libsql::params![user_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(CommonError::from)? {
            items.push(row_to_subscription(&row)?);
        }
        Ok(items)
    }
}

fn row_to_credential(row: &libsql::Row) -> Result<UserMcpCredential, CommonError> {
    let credential_id: String = row.get(0).map_err(CommonError::from)?;
    let user_id: String = row.get(1).map_err(CommonError::from)?;
    let mcp_id: String = row.get(2).map_err(CommonError::from)?;
    let encrypted_credentials: Vec<u8> = row.get(3).map_err(CommonError::from)?;
    let encryption_iv: Vec<u8> = row.get(4).map_err(CommonError::from)?;
    let created_at: String = row.get(5).map_err(CommonError::from)?;
    let updated_at: String = row.get(6).map_err(CommonError::from)?;

    Ok(UserMcpCredential {
        credential_id: WrappedUuidV4::try_from(credential_id).map_err(CommonError::from)?,
        user_id: WrappedUuidV4::try_from(user_id).map_err(CommonError::from)?,
        mcp_id: WrappedUuidV4::try_from(mcp_id).map_err(CommonError::from)?,
        encrypted_credentials,
        encryption_iv,
        created_at: WrappedChronoDateTime::try_from(created_at.as_str()).map_err(CommonError::from)?,
        updated_at: WrappedChronoDateTime::try_from(updated_at.as_str()).map_err(CommonError::from)?,
    })
}

#[async_trait]
impl CredentialRepositoryLike for Repository {
    async fn upsert(&self, cred: &UserMcpCredential) -> Result<(), CommonError> {
        self.conn
            .execute(
                "INSERT INTO user_mcp_credentials (
                    credential_id, user_id, mcp_id, encrypted_credentials, encryption_iv, created_at, updated_at
                ) VALUES (?1,?2,?3,?4,?5,?6,?7)
                 ON CONFLICT(user_id, mcp_id) DO UPDATE SET
                    encrypted_credentials = excluded.encrypted_credentials,
                    encryption_iv = excluded.encryption_iv,
                    updated_at = excluded.updated_at",
                libsql::params![
                    cred.credential_id.to_string(),
                    cred.user_id.to_string(),
                    cred.mcp_id.to_string(),
                    cred.encrypted_credentials.clone(),
                    cred.encryption_iv.clone(),
                    cred.created_at.to_string(),
                    cred.updated_at.to_string(),
                ],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn get(
        &self,
        user_id: &WrappedUuidV4,
        mcp_id: &WrappedUuidV4,
    ) -> Result<Option<UserMcpCredential>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT credential_id, user_id, mcp_id, encrypted_credentials, encryption_iv, created_at, updated_at
                 FROM user_mcp_credentials WHERE user_id = ?1 AND mcp_id = ?2",
                libsql::params![user_id.to_string(), mcp_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        match rows.next().await.map_err(CommonError::from)? {
            Some(row) => Ok(Some(row_to_credential(&row)?)),
            None => Ok(None),
        }
    }

    async fn delete_for_user(&self, user_id: &WrappedUuidV4) -> Result<(), CommonError> {
        self.conn
            .execute(
                "DELETE FROM user_mcp_credentials WHERE user_id = ?1",
                libsql::params![user_id.to_string()],
            )
            .await
            .map_err(CommonError::from)?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<UserMcpCredential>, CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT credential_id, user_id, mcp_id, encrypted_credentials, encryption_iv, created_at, updated_at
                 FROM user_mcp_credentials",
                (),
            )
            .await
            .map_err(CommonError::from)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await.map_err(CommonError::from)? {
            items.push(row_to_credential(&row)?);
        }
        Ok(items)
    }
}

/// Bridges the gateway's credential table to the vault's rotation contract
/// (`vault::CredentialRowRepositoryLike`) without the vault crate needing to
/// know this table's schema. The `user_salt` passed to the closure is looked
/// up per-row from `identity::users.vault_salt`.
pub struct CredentialRowAdapter {
    conn: Connection,
}

impl CredentialRowAdapter {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// UUIDs stored in `credential_id` are hyphenated hex only; reject anything
/// else rather than inline it into the batch statement.
fn sql_safe_uuid(s: &str) -> Result<&str, CommonError> {
    if s.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        Ok(s)
    } else {
        Err(CommonError::Internal { source: anyhow::anyhow!("credential_id not a safe uuid literal") })
    }
}

#[async_trait]
impl vault::CredentialRowRepositoryLike for CredentialRowAdapter {
    async fn reencrypt_all_rows(
        &self,
        reencrypt_row: &(dyn Fn(&[u8], &[u8]) -> Result<Vec<u8>, CommonError> + Sync),
    ) -> Result<(), CommonError> {
        let mut rows = self
            .conn
            .query(
                "SELECT c.credential_id, c.encrypted_credentials, u.vault_salt
                 FROM user_mcp_credentials c JOIN users u ON u.user_id = c.user_id",
                (),
            )
            .await
            .map_err(CommonError::from)?;

        let mut updates: Vec<(String, Vec<u8>)> = Vec::new();
        while let Some(row) = rows.next().await.map_err(CommonError::from)? {
            let credential_id: String = row.get(0).map_err(CommonError::from)?;
            let ciphertext: Vec<u8> = row.get(1).map_err(CommonError::from)?;
            let vault_salt: Vec<u8> = row.get(2).map_err(CommonError::from)?;
            let new_ciphertext = reencrypt_row(&vault_salt, &ciphertext)?;
            updates.push((credential_id, new_ciphertext));
        }

        if updates.is_empty() {
            return Ok(());
        }

        // `execute_transactional_batch` takes a single raw SQL string, no bind
        // params, so ciphertexts are inlined as hex blob literals.
        let mut batch = String::new();
        for (credential_id, new_ciphertext) in &updates {
            let id = sql_safe_uuid(credential_id)?;
            batch.push_str(&format!(
                "UPDATE user_mcp_credentials SET encrypted_credentials = X'{}' WHERE credential_id = '{}';\n",
                hex_encode(new_ciphertext),
                id,
            ));
        }

        self.conn.execute_transactional_batch(&batch).await.map_err(CommonError::from)?;
        Ok(())
    }
}
