//! Admin HTTP surface: `POST /v1/admin/rotate-credential-key`.

use std::sync::Arc;

use axum::{Json, extract::State};
use serde::Deserialize;
use shared::adapters::openapi::JsonResponse;
use shared::error::CommonError;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::master_key::MasterKey;
use crate::vault::{CredentialRowRepositoryLike, CredentialVault};

#[derive(Clone)]
pub struct VaultState {
    pub vault: Arc<CredentialVault>,
    pub credential_repo: Arc<dyn CredentialRowRepositoryLike>,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct RotateCredentialKeyRequest {
    /// 64 hex characters (32 bytes).
    pub new_key: String,
}

#[utoipa::path(
    post,
    path = "/v1/admin/rotate-credential-key",
    request_body = RotateCredentialKeyRequest,
    responses((status = 200, description = "Master key rotated")),
    tag = "admin"
)]
async fn rotate_credential_key(
    State(state): State<VaultState>,
    Json(body): Json<RotateCredentialKeyRequest>,
) -> JsonResponse<(), CommonError> {
    let result = async {
        let new_key = MasterKey::from_hex(&body.new_key)?;
        state
            .vault
            .rotate_master_key(new_key, state.credential_repo.as_ref())
            .await
    }
    .await;
    result.into()
}

pub fn router(state: VaultState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(rotate_credential_key))
        .with_state(state)
}
