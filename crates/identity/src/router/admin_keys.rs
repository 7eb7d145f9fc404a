//! `POST /v1/admin/keys/{generate,recover,rotate,factory-reset}`.

use axum::Json;
use axum::extract::State;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use shared::adapters::openapi::{API_VERSION_TAG, JsonResponse};
use shared::error::CommonError;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::service::IdentityService;

use super::{API_VERSION_1, require_admin};

const TAG: &str = "admin-keys";

pub fn create_admin_key_routes() -> OpenApiRouter<IdentityService> {
    OpenApiRouter::new()
        .routes(routes!(route_generate))
        .routes(routes!(route_recover))
        .routes(routes!(route_rotate))
        .routes(routes!(route_factory_reset))
        .routes(routes!(route_rotate_hmac_secret))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminKeyIssued {
    pub admin_key: String,
    pub recovery_token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecoverRequest {
    pub recovery_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RotateRequest {
    pub admin_key: String,
    pub recovery_token: String,
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/keys/generate", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    responses(
        (status = 200, description = "Admin key bootstrapped", body = AdminKeyIssued),
        (status = 409, description = "An active admin key already exists", body = CommonError),
    ),
)]
async fn route_generate(State(service): State<IdentityService>) -> JsonResponse<AdminKeyIssued, CommonError> {
    let result = service.admin_keys.generate().await.map(|key| AdminKeyIssued {
        admin_key: key.plaintext,
        recovery_token: None,
    });
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/keys/recover", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    request_body = RecoverRequest,
    responses(
        (status = 200, description = "New admin key issued", body = AdminKeyIssued),
        (status = 401, description = "Invalid recovery token", body = CommonError),
    ),
)]
async fn route_recover(
    State(service): State<IdentityService>,
    Json(body): Json<RecoverRequest>,
) -> JsonResponse<AdminKeyIssued, CommonError> {
    let result = service.admin_keys.recover(&body.recovery_token).await.map(|key| AdminKeyIssued {
        admin_key: key.plaintext,
        recovery_token: None,
    });
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/keys/rotate", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    request_body = RotateRequest,
    responses(
        (status = 200, description = "Admin key and recovery token rotated", body = AdminKeyIssued),
        (status = 401, description = "Invalid admin key or recovery token", body = CommonError),
    ),
)]
async fn route_rotate(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Json(body): Json<RotateRequest>,
) -> JsonResponse<AdminKeyIssued, CommonError> {
    let result = async {
        require_admin(&service, &headers).await?;
        let (admin_key, recovery_token) =
            service.admin_keys.rotate(&body.admin_key, &body.recovery_token).await?;
        Ok::<_, CommonError>(AdminKeyIssued {
            admin_key: admin_key.plaintext,
            recovery_token: Some(recovery_token.plaintext),
        })
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/keys/factory-reset", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    responses(
        (status = 200, description = "All admin keys reset", body = AdminKeyIssued),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
    ),
)]
async fn route_factory_reset(
    State(service): State<IdentityService>,
    headers: HeaderMap,
) -> JsonResponse<AdminKeyIssued, CommonError> {
    let result = async {
        require_admin(&service, &headers).await?;
        let admin_key = service.admin_keys.factory_reset().await?;
        Ok::<_, CommonError>(AdminKeyIssued {
            admin_key: admin_key.plaintext,
            recovery_token: None,
        })
    }
    .await;
    JsonResponse::from(result)
}

/// Rotates the session-HMAC secret. Every
/// session issued under the previous secret stops verifying immediately
/// (`session::verify_session` re-derives the HMAC on each call rather than
/// caching it), so this is a blunt, admin-only instrument.
#[utoipa::path(
    post,
    path = format!("/{}/admin/rotate-hmac-secret", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    responses(
        (status = 200, description = "Session HMAC secret rotated; all existing sessions invalidated"),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
    ),
)]
async fn route_rotate_hmac_secret(
    State(service): State<IdentityService>,
    headers: HeaderMap,
) -> JsonResponse<(), CommonError> {
    let result = async {
        require_admin(&service, &headers).await?;
        service.session_secret.rotate_and_persist(&service.data_dir)
    }
    .await;
    JsonResponse::from(result)
}
