//! User-facing credential storage for per-user MCPs that
//! `requires_user_credentials`. Plaintext never leaves this
//! handler: it is encrypted under the caller's per-user vault subkey before
//! the repository ever sees it.

use axum::Json;
use axum::extract::{Path, State};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use shared::adapters::openapi::{API_VERSION_TAG, JsonResponse};
use shared::error::CommonError;
use shared::primitives::{WrappedChronoDateTime, WrappedUuidV4};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use identity::router::require_user_session;

use crate::model::UserMcpCredential;
use crate::service::GatewayService;

use super::API_VERSION_1;

const TAG: &str = "credentials";

pub fn create_credential_routes() -> OpenApiRouter<GatewayService> {
    OpenApiRouter::new()
        .routes(routes!(route_put_credentials))
        .routes(routes!(route_delete_credentials))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PutCredentialsRequest {
    pub credentials: serde_json::Value,
}

#[utoipa::path(
    put,
    path = format!("/{}/users/me/mcps/{{mcp_id}}/credentials", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("mcp_id" = String, Path, description = "MCP catalog entry id")),
    request_body = PutCredentialsRequest,
    responses(
        (status = 200, description = "Credentials stored"),
        (status = 401, description = "No valid session", body = CommonError),
        (status = 404, description = "MCP not found", body = CommonError),
    ),
)]
async fn route_put_credentials(
    State(service): State<GatewayService>,
    jar: CookieJar,
    Path(mcp_id): Path<String>,
    Json(body): Json<PutCredentialsRequest>,
) -> JsonResponse<(), CommonError> {
    let result = async {
        let session = require_user_session(&service.identity, &jar).await?;
        let mcp_id = WrappedUuidV4::try_from(mcp_id)
            .map_err(|_| CommonError::InvalidFormat { msg: "mcp_id is not a valid UUID".to_string() })?;
        // Confirms the entry exists and surfaces not_found before any crypto work.
        service.catalog.get_by_id(&mcp_id).await?;

        let user = service.identity.users.get_by_id(&session.user_id).await?;
        let plaintext = serde_json::to_vec(&body.credentials).map_err(CommonError::from)?;
        // The nonce is prepended inside the blob itself (see vault::cipher);
        // `encryption_iv` is kept empty rather than duplicating it.
        let encrypted_credentials = service.vault.encrypt(&user.vault_salt, &plaintext).await?;

        let now = WrappedChronoDateTime::now();
        let existing = service.credentials.get(&session.user_id, &mcp_id).await?;
        let credential = UserMcpCredential {
            credential_id: existing.map(|e| e.credential_id).unwrap_or_else(WrappedUuidV4::new),
            user_id: session.user_id.clone(),
            mcp_id,
            encrypted_credentials,
            encryption_iv: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        };
        service.credentials.upsert(&credential).await?;
        service.user_pool.terminate_for_user(&session.user_id.to_string()).await;
        Ok::<_, CommonError>(())
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    delete,
    path = format!("/{}/users/me/mcps/{{mcp_id}}/credentials", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("mcp_id" = String, Path, description = "MCP catalog entry id")),
    responses(
        (status = 200, description = "Credentials deleted"),
        (status = 401, description = "No valid session", body = CommonError),
    ),
)]
async fn route_delete_credentials(
    State(service): State<GatewayService>,
    jar: CookieJar,
) -> JsonResponse<(), CommonError> {
    let result = async {
        let session = require_user_session(&service.identity, &jar).await?;
        service.credentials.delete_for_user(&session.user_id).await?;
        service.user_pool.terminate_for_user(&session.user_id.to_string()).await;
        Ok::<_, CommonError>(())
    }
    .await;
    JsonResponse::from(result)
}
