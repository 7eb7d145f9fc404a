//! Admin client register/rotate and user-facing `/v1/users/me/clients` CRUD.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum_extra::extract::cookie::CookieJar;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use shared::adapters::openapi::{API_VERSION_TAG, JsonResponse};
use shared::error::CommonError;
use shared::primitives::{PaginatedResponse, PaginationRequest, WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::api_key;
use crate::model::{Client, ClientStatus};
use crate::service::IdentityService;

use super::{API_VERSION_1, require_admin, require_user_session};

const TAG: &str = "clients";

pub fn create_client_routes() -> OpenApiRouter<IdentityService> {
    OpenApiRouter::new()
        .routes(routes!(route_admin_register))
        .routes(routes!(route_admin_rotate))
        .routes(routes!(route_list_my_clients))
        .routes(routes!(route_create_my_client))
        .routes(routes!(route_delete_my_client))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterClientRequest {
    pub client_name: String,
    pub user_id: String,
    pub profile_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClientIssued {
    pub client: Client,
    /// Returned exactly once, on creation/rotation.
    pub plaintext_key: String,
}

async fn build_and_insert_client(
    service: &IdentityService,
    client_name: String,
    user_id: WrappedUuidV4,
    profile_id: WrappedUuidV4,
) -> Result<ClientIssued, CommonError> {
    let generated = api_key::generate_client_key();
    let now = WrappedChronoDateTime::now();

    let client = Client {
        client_id: WrappedUuidV4::new(),
        client_name,
        key_prefix: generated.prefix_index.clone(),
        key_hash: generated.hash.clone(),
        user_id,
        profile_id,
        status: ClientStatus::Active,
        created_at: now.clone(),
        expires_at: None,
        last_used_at: None,
        metadata: WrappedJsonValue::new(serde_json::json!({})),
    };

    service.clients.create(&client).await?;

    Ok(ClientIssued {
        client,
        plaintext_key: generated.plaintext,
    })
}

#[utoipa::path(
    post,
    path = format!("/{}/clients/register", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    request_body = RegisterClientRequest,
    responses(
        (status = 200, description = "Client registered", body = ClientIssued),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
    ),
)]
async fn route_admin_register(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Json(body): Json<RegisterClientRequest>,
) -> JsonResponse<ClientIssued, CommonError> {
    let result = async {
        require_admin(&service, &headers).await?;
        let user_id = WrappedUuidV4::try_from(body.user_id).map_err(|_| CommonError::InvalidFormat {
            msg: "user_id is not a valid UUID".to_string(),
        })?;
        let profile_id = WrappedUuidV4::try_from(body.profile_id).map_err(|_| CommonError::InvalidFormat {
            msg: "profile_id is not a valid UUID".to_string(),
        })?;
        build_and_insert_client(&service, body.client_name, user_id, profile_id).await
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/clients/{{id}}/rotate", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "Client id")),
    responses(
        (status = 200, description = "Client key rotated", body = ClientIssued),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
        (status = 404, description = "Client not found", body = CommonError),
    ),
)]
async fn route_admin_rotate(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> JsonResponse<ClientIssued, CommonError> {
    let result = async {
        require_admin(&service, &headers).await?;
        let client_id = WrappedUuidV4::try_from(id).map_err(|_| CommonError::InvalidFormat {
            msg: "id is not a valid UUID".to_string(),
        })?;
        let mut client = service.clients.get_by_id(&client_id).await?;

        let generated = api_key::generate_client_key();
        client.key_prefix = generated.prefix_index.clone();
        client.key_hash = generated.hash.clone();
        service.clients.update(&client).await?;

        Ok::<_, CommonError>(ClientIssued {
            client,
            plaintext_key: generated.plaintext,
        })
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    get,
    path = format!("/{}/users/me/clients", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(PaginationRequest),
    responses(
        (status = 200, description = "List clients owned by the caller", body = PaginatedResponse<Client>),
        (status = 401, description = "No valid session", body = CommonError),
    ),
)]
async fn route_list_my_clients(
    State(service): State<IdentityService>,
    jar: CookieJar,
    Query(pagination): Query<PaginationRequest>,
) -> JsonResponse<PaginatedResponse<Client>, CommonError> {
    let result = async {
        let session = require_user_session(&service, &jar).await?;
        service.clients.list_for_user(&session.user_id, &pagination).await
    }
    .await;
    JsonResponse::from(result)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateMyClientRequest {
    pub client_name: String,
    pub profile_id: String,
}

#[utoipa::path(
    post,
    path = format!("/{}/users/me/clients", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    request_body = CreateMyClientRequest,
    responses(
        (status = 200, description = "Client created", body = ClientIssued),
        (status = 401, description = "No valid session", body = CommonError),
    ),
)]
async fn route_create_my_client(
    State(service): State<IdentityService>,
    jar: CookieJar,
    Json(body): Json<CreateMyClientRequest>,
) -> JsonResponse<ClientIssued, CommonError> {
    let result = async {
        let session = require_user_session(&service, &jar).await?;
        let profile_id = WrappedUuidV4::try_from(body.profile_id).map_err(|_| CommonError::InvalidFormat {
            msg: "profile_id is not a valid UUID".to_string(),
        })?;
        build_and_insert_client(&service, body.client_name, session.user_id, profile_id).await
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    delete,
    path = format!("/{}/users/me/clients/{{id}}", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "Client id")),
    responses(
        (status = 200, description = "Client deleted"),
        (status = 401, description = "No valid session", body = CommonError),
        (status = 403, description = "Client belongs to a different user", body = CommonError),
        (status = 404, description = "Client not found", body = CommonError),
    ),
)]
async fn route_delete_my_client(
    State(service): State<IdentityService>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> JsonResponse<(), CommonError> {
    let result = async {
        let session = require_user_session(&service, &jar).await?;
        let client_id = WrappedUuidV4::try_from(id).map_err(|_| CommonError::InvalidFormat {
            msg: "id is not a valid UUID".to_string(),
        })?;
        let client = service.clients.get_by_id(&client_id).await?;
        if client.user_id != session.user_id {
            return Err(CommonError::Forbidden {
                msg: "client belongs to a different user".to_string(),
            });
        }
        service.clients.delete(&client_id).await
    }
    .await;
    JsonResponse::from(result)
}
