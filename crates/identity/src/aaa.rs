//! API-key authentication orchestration:
//! turns request headers into a [`SessionContext`] the gateway's AAA
//! pipeline hands to the authorization engine.

use std::sync::Arc;

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use shared::error::CommonError;
use shared::primitives::{WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4};
use utoipa::ToSchema;

use crate::api_key;
use crate::model::{Client, ClientStatus};
use crate::repository::{ClientRepositoryLike, GroupRepositoryLike};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Result of a successful client authentication, handed to the
/// authorization engine and recorded on every subsequent audit event for
/// the request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionContext {
    pub session_id: WrappedUuidV4,
    pub client_id: WrappedUuidV4,
    pub user_id: WrappedUuidV4,
    pub profile_id: WrappedUuidV4,
    pub auth_method: String,
    pub groups: Vec<String>,
    pub attributes: WrappedJsonValue,
    pub issued_at: WrappedChronoDateTime,
    pub expires_at: WrappedChronoDateTime,
}

pub const COMMUNITY_TIER_TTL_SECS: i64 = 3_600;

pub struct ApiKeyAuthenticator {
    clients: Arc<dyn ClientRepositoryLike>,
    groups: Arc<dyn GroupRepositoryLike>,
}

impl ApiKeyAuthenticator {
    pub fn new(clients: Arc<dyn ClientRepositoryLike>, groups: Arc<dyn GroupRepositoryLike>) -> Self {
        Self { clients, groups }
    }

    /// Header parsing and format checks happen before any repository call
    /// so a malformed request never reaches the database (a CPU-amplification
    /// guard: hashing a dummy secret is still cheaper than a wasted lookup).
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<SessionContext, CommonError> {
        let api_key = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| CommonError::MissingCredentials {
                msg: format!("missing {API_KEY_HEADER} header"),
            })?;
        let client_id_header = headers
            .get(CLIENT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| CommonError::MissingCredentials {
                msg: format!("missing {CLIENT_ID_HEADER} header"),
            })?;

        if !api_key::is_well_formed_client_key(api_key) {
            return Err(CommonError::InvalidFormat {
                msg: "malformed X-API-Key".to_string(),
            });
        }
        let client_id = WrappedUuidV4::try_from(client_id_header.to_string()).map_err(|_| {
            CommonError::InvalidFormat {
                msg: "X-Client-Id is not a valid UUID v4".to_string(),
            }
        })?;

        let client = match self.clients.get_by_id(&client_id).await {
            Ok(client) => client,
            Err(CommonError::NotFound { .. }) => {
                api_key::verify_against_dummy();
                return Err(CommonError::InvalidCredentials {
                    msg: "invalid client or key".to_string(),
                });
            }
            Err(other) => return Err(other),
        };

        if client.status != ClientStatus::Active {
            return Err(CommonError::ClientSuspended {
                msg: format!("client {client_id} is not active"),
            });
        }

        if !api_key::verify_secret(api_key, &client.key_hash) {
            return Err(CommonError::InvalidCredentials {
                msg: "invalid client or key".to_string(),
            });
        }

        self.clients.touch_last_used(&client_id).await;

        Ok(self.build_session(&client).await?)
    }

    async fn build_session(&self, client: &Client) -> Result<SessionContext, CommonError> {
        let groups = self.user_group_names(&client.user_id).await?;
        let issued_at = WrappedChronoDateTime::now();
        let expires_at = WrappedChronoDateTime::new(
            *issued_at.get_inner() + chrono::Duration::seconds(COMMUNITY_TIER_TTL_SECS),
        );

        Ok(SessionContext {
            session_id: WrappedUuidV4::new(),
            client_id: client.client_id.clone(),
            user_id: client.user_id.clone(),
            profile_id: client.profile_id.clone(),
            auth_method: "api_key".to_string(),
            groups,
            attributes: WrappedJsonValue::new(client.metadata.get_inner().clone()),
            issued_at,
            expires_at,
        })
    }

    async fn user_group_names(&self, user_id: &WrappedUuidV4) -> Result<Vec<String>, CommonError> {
        Ok(self.groups.list_for_user(user_id).await?.into_iter().map(|g| g.name).collect())
    }
}
