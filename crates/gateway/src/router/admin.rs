//! Admin-gated equivalent of `vault::router`'s rotate-key endpoint (spec
//! §4.2, §6). The vault crate's own handler has no admin check since it
//! can't depend on identity's guards without an inverted dependency; this
//! crate can, because [`GatewayService`] already carries both.

use axum::Json;
use axum::extract::State;
use http::HeaderMap;
use serde::Deserialize;
use shared::adapters::openapi::{API_VERSION_TAG, JsonResponse};
use shared::error::CommonError;
use utoipa_axum::{router::OpenApiRouter, routes};

use identity::router::require_admin;
use vault::MasterKey;

use crate::service::GatewayService;

use super::API_VERSION_1;

const TAG: &str = "admin";

pub fn create_admin_routes() -> OpenApiRouter<GatewayService> {
    OpenApiRouter::new().routes(routes!(route_rotate_credential_key))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RotateCredentialKeyRequest {
    /// 64 hex characters (32 bytes).
    pub new_key: String,
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/rotate-credential-key", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    request_body = RotateCredentialKeyRequest,
    responses(
        (status = 200, description = "Master key rotated"),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
        (status = 400, description = "Malformed key", body = CommonError),
    ),
)]
async fn route_rotate_credential_key(
    State(service): State<GatewayService>,
    headers: HeaderMap,
    Json(body): Json<RotateCredentialKeyRequest>,
) -> JsonResponse<(), CommonError> {
    let result = async {
        require_admin(&service.identity, &headers).await?;
        let new_key = MasterKey::from_hex(&body.new_key)?;
        service.vault.rotate_master_key(new_key, service.credential_row_repo.as_ref()).await
    }
    .await;
    JsonResponse::from(result)
}
