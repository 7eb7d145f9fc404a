//! `/v1/admin/groups` CRUD plus member/mcp attachment.

use axum::Json;
use axum::extract::{Path, Query, State};
use http::HeaderMap;
use serde::Deserialize;
use shared::adapters::openapi::{API_VERSION_TAG, JsonResponse};
use shared::error::CommonError;
use shared::primitives::{PaginatedResponse, PaginationRequest, WrappedUuidV4};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::model::{Group, GroupStatus};
use crate::service::IdentityService;

use super::{API_VERSION_1, require_admin};

const TAG: &str = "groups";

pub fn create_group_routes() -> OpenApiRouter<IdentityService> {
    OpenApiRouter::new()
        .routes(routes!(route_create_group))
        .routes(routes!(route_list_groups))
        .routes(routes!(route_get_group))
        .routes(routes!(route_update_group))
        .routes(routes!(route_delete_group))
        .routes(routes!(route_add_member))
        .routes(routes!(route_remove_member))
        .routes(routes!(route_add_mcp))
        .routes(routes!(route_remove_mcp))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateGroupRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<GroupStatus>,
}

fn parse_uuid(raw: String, field: &str) -> Result<WrappedUuidV4, CommonError> {
    WrappedUuidV4::try_from(raw).map_err(|_| CommonError::InvalidFormat {
        msg: format!("{field} is not a valid UUID"),
    })
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/groups", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    request_body = CreateGroupRequest,
    responses((status = 200, description = "Group created", body = Group)),
)]
async fn route_create_group(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Json(body): Json<CreateGroupRequest>,
) -> JsonResponse<Group, CommonError> {
    let result = async {
        require_admin(&service, &headers).await?;
        let group = Group {
            group_id: WrappedUuidV4::new(),
            name: body.name,
            description: body.description,
            status: GroupStatus::Active,
        };
        service.groups.create(&group).await?;
        Ok::<_, CommonError>(group)
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    get,
    path = format!("/{}/admin/groups", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(PaginationRequest),
    responses((status = 200, description = "List groups", body = PaginatedResponse<Group>)),
)]
async fn route_list_groups(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Query(pagination): Query<PaginationRequest>,
) -> JsonResponse<PaginatedResponse<Group>, CommonError> {
    let result = async {
        require_admin(&service, &headers).await?;
        service.groups.list(&pagination).await
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    get,
    path = format!("/{}/admin/groups/{{id}}", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "Group id")),
    responses((status = 200, description = "Group detail", body = Group)),
)]
async fn route_get_group(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> JsonResponse<Group, CommonError> {
    let result = async {
        require_admin(&service, &headers).await?;
        service.groups.get_by_id(&parse_uuid(id, "id")?).await
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    patch,
    path = format!("/{}/admin/groups/{{id}}", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "Group id")),
    request_body = UpdateGroupRequest,
    responses((status = 200, description = "Group updated", body = Group)),
)]
async fn route_update_group(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateGroupRequest>,
) -> JsonResponse<Group, CommonError> {
    let result = async {
        require_admin(&service, &headers).await?;
        let mut group = service.groups.get_by_id(&parse_uuid(id, "id")?).await?;
        if let Some(name) = body.name {
            group.name = name;
        }
        if let Some(description) = body.description {
            group.description = description;
        }
        if let Some(status) = body.status {
            group.status = status;
        }
        service.groups.update(&group).await?;
        Ok::<_, CommonError>(group)
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    delete,
    path = format!("/{}/admin/groups/{{id}}", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "Group id")),
    responses((status = 200, description = "Group deleted")),
)]
async fn route_delete_group(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> JsonResponse<(), CommonError> {
    let result = async {
        require_admin(&service, &headers).await?;
        service.groups.delete(&parse_uuid(id, "id")?).await
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/groups/{{id}}/members/{{user_id}}", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "Group id"), ("user_id" = String, Path, description = "User id")),
    responses((status = 200, description = "Member added")),
)]
async fn route_add_member(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Path((id, user_id)): Path<(String, String)>,
) -> JsonResponse<(), CommonError> {
    let result = async {
        require_admin(&service, &headers).await?;
        service.groups.add_user_member(&parse_uuid(id, "id")?, &parse_uuid(user_id, "user_id")?).await
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    delete,
    path = format!("/{}/admin/groups/{{id}}/members/{{user_id}}", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "Group id"), ("user_id" = String, Path, description = "User id")),
    responses((status = 200, description = "Member removed")),
)]
async fn route_remove_member(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Path((id, user_id)): Path<(String, String)>,
) -> JsonResponse<(), CommonError> {
    let result = async {
        require_admin(&service, &headers).await?;
        service.groups.remove_user_member(&parse_uuid(id, "id")?, &parse_uuid(user_id, "user_id")?).await
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/groups/{{id}}/mcps/{{mcp_id}}", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "Group id"), ("mcp_id" = String, Path, description = "MCP id")),
    responses((status = 200, description = "MCP added to group")),
)]
async fn route_add_mcp(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Path((id, mcp_id)): Path<(String, String)>,
) -> JsonResponse<(), CommonError> {
    let result = async {
        require_admin(&service, &headers).await?;
        service.groups.add_mcp_member(&parse_uuid(id, "id")?, &parse_uuid(mcp_id, "mcp_id")?).await
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    delete,
    path = format!("/{}/admin/groups/{{id}}/mcps/{{mcp_id}}", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "Group id"), ("mcp_id" = String, Path, description = "MCP id")),
    responses((status = 200, description = "MCP removed from group")),
)]
async fn route_remove_mcp(
    State(service): State<IdentityService>,
    headers: HeaderMap,
    Path((id, mcp_id)): Path<(String, String)>,
) -> JsonResponse<(), CommonError> {
    let result = async {
        require_admin(&service, &headers).await?;
        service.groups.remove_mcp_member(&parse_uuid(id, "id")?, &parse_uuid(mcp_id, "mcp_id")?).await
    }
    .await;
    JsonResponse::from(result)
}
