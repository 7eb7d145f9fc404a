//! Admin CRUD over the MCP catalog plus the validate/publish/archive
//! lifecycle and the hot-reload preview/apply endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use http::HeaderMap;
use serde::Deserialize;
use shared::adapters::openapi::{API_VERSION_TAG, JsonResponse};
use shared::error::CommonError;
use shared::primitives::{
    PaginatedResponse, PaginationRequest, WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4,
};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use identity::router::require_admin;

use crate::model::{AuthType, IsolationMode, McpCatalogEntry, McpStatus, TransportType, ValidationStatus};
use crate::reloader::{ApplyResult, CatalogDiff};
use crate::service::GatewayService;
use crate::validation::{ValidationReport, validate_mcp_config};

use super::API_VERSION_1;

const TAG: &str = "catalog";

pub fn create_catalog_routes() -> OpenApiRouter<GatewayService> {
    OpenApiRouter::new()
        .routes(routes!(route_list))
        .routes(routes!(route_create))
        .routes(routes!(route_get))
        .routes(routes!(route_update))
        .routes(routes!(route_delete))
        .routes(routes!(route_validate))
        .routes(routes!(route_publish))
        .routes(routes!(route_archive))
        .routes(routes!(route_reload_preview))
        .routes(routes!(route_reload_apply))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCatalogEntryRequest {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub transport_type: TransportType,
    pub config: serde_json::Value,
    pub isolation_mode: IsolationMode,
    pub requires_user_credentials: bool,
    pub credential_schema: Option<serde_json::Value>,
    pub auth_type: AuthType,
    pub oauth_config: Option<serde_json::Value>,
    pub timeout_seconds: Option<u64>,
}

#[utoipa::path(
    get,
    path = format!("/{}/admin/catalog", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(PaginationRequest),
    responses(
        (status = 200, description = "Paginated catalog entries", body = PaginatedResponse<McpCatalogEntry>),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
    ),
)]
async fn route_list(
    State(service): State<GatewayService>,
    headers: HeaderMap,
    Query(pagination): Query<PaginationRequest>,
) -> JsonResponse<PaginatedResponse<McpCatalogEntry>, CommonError> {
    let result = async {
        require_admin(&service.identity, &headers).await?;
        service.catalog.list(&pagination).await
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/catalog", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    request_body = CreateCatalogEntryRequest,
    responses(
        (status = 200, description = "Catalog entry created in draft status", body = McpCatalogEntry),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
    ),
)]
async fn route_create(
    State(service): State<GatewayService>,
    headers: HeaderMap,
    Json(body): Json<CreateCatalogEntryRequest>,
) -> JsonResponse<McpCatalogEntry, CommonError> {
    let result = async {
        require_admin(&service.identity, &headers).await?;
        let now = WrappedChronoDateTime::now();
        let entry = McpCatalogEntry {
            mcp_id: WrappedUuidV4::new(),
            name: body.name,
            display_name: body.display_name,
            description: body.description,
            transport_type: body.transport_type,
            config: WrappedJsonValue::new(body.config),
            isolation_mode: body.isolation_mode,
            requires_user_credentials: body.requires_user_credentials,
            credential_schema: body.credential_schema.map(WrappedJsonValue::new),
            tool_catalog: WrappedJsonValue::new(serde_json::json!([])),
            validation_status: ValidationStatus::Pending,
            status: McpStatus::Draft,
            auth_type: body.auth_type,
            oauth_config: body.oauth_config.map(WrappedJsonValue::new),
            timeout_seconds: body.timeout_seconds,
            created_at: now.clone(),
            updated_at: now,
        };
        service.catalog.create(&entry).await?;
        Ok::<_, CommonError>(entry)
    }
    .await;
    JsonResponse::from(result)
}

pub(crate) fn parse_id(id: String) -> Result<WrappedUuidV4, CommonError> {
    WrappedUuidV4::try_from(id).map_err(|_| CommonError::InvalidFormat { msg: "id is not a valid UUID".to_string() })
}

#[utoipa::path(
    get,
    path = format!("/{}/admin/catalog/{{id}}", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "MCP catalog entry id")),
    responses(
        (status = 200, description = "Catalog entry", body = McpCatalogEntry),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
        (status = 404, description = "Not found", body = CommonError),
    ),
)]
async fn route_get(
    State(service): State<GatewayService>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> JsonResponse<McpCatalogEntry, CommonError> {
    let result = async {
        require_admin(&service.identity, &headers).await?;
        service.catalog.get_by_id(&parse_id(id)?).await
    }
    .await;
    JsonResponse::from(result)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCatalogEntryRequest {
    pub display_name: String,
    pub description: String,
    pub requires_user_credentials: bool,
    pub credential_schema: Option<serde_json::Value>,
    pub auth_type: AuthType,
    pub oauth_config: Option<serde_json::Value>,
    pub timeout_seconds: Option<u64>,
}

#[utoipa::path(
    patch,
    path = format!("/{}/admin/catalog/{{id}}", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "MCP catalog entry id")),
    request_body = UpdateCatalogEntryRequest,
    responses(
        (status = 200, description = "Catalog entry updated", body = McpCatalogEntry),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
        (status = 404, description = "Not found", body = CommonError),
        (status = 422, description = "Attempted to change a structural field of a published entry", body = CommonError),
    ),
)]
async fn route_update(
    State(service): State<GatewayService>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateCatalogEntryRequest>,
) -> JsonResponse<McpCatalogEntry, CommonError> {
    let result = async {
        require_admin(&service.identity, &headers).await?;
        let mut entry = service.catalog.get_by_id(&parse_id(id)?).await?;

        entry.display_name = body.display_name;
        entry.description = body.description;
        entry.requires_user_credentials = body.requires_user_credentials;
        entry.credential_schema = body.credential_schema.map(WrappedJsonValue::new);
        entry.auth_type = body.auth_type;
        entry.oauth_config = body.oauth_config.map(WrappedJsonValue::new);
        entry.timeout_seconds = body.timeout_seconds;
        entry.updated_at = WrappedChronoDateTime::now();
        if entry.status == McpStatus::Published {
            entry.validation_status = ValidationStatus::Pending;
        }

        service.catalog.update(&entry).await?;
        Ok::<_, CommonError>(entry)
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    delete,
    path = format!("/{}/admin/catalog/{{id}}", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "MCP catalog entry id")),
    responses(
        (status = 200, description = "Catalog entry deleted"),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
        (status = 409, description = "Entry is not archived", body = CommonError),
    ),
)]
async fn route_delete(
    State(service): State<GatewayService>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> JsonResponse<(), CommonError> {
    let result = async {
        require_admin(&service.identity, &headers).await?;
        let id = parse_id(id)?;
        let entry = service.catalog.get_by_id(&id).await?;
        if entry.status != McpStatus::Archived {
            return Err(CommonError::Conflict { msg: "only archived entries may be deleted".to_string() });
        }
        service.catalog.delete(&id).await
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/catalog/{{id}}/validate", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "MCP catalog entry id")),
    responses(
        (status = 200, description = "Validation report", body = ValidationReport),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
        (status = 404, description = "Not found", body = CommonError),
    ),
)]
async fn route_validate(
    State(service): State<GatewayService>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> JsonResponse<ValidationReport, CommonError> {
    let result = async {
        require_admin(&service.identity, &headers).await?;
        let mut entry = service.catalog.get_by_id(&parse_id(id)?).await?;
        let report = validate_mcp_config(&entry);
        entry.validation_status = if report.valid { ValidationStatus::Valid } else { ValidationStatus::Invalid };
        entry.updated_at = WrappedChronoDateTime::now();
        service.catalog.update(&entry).await?;
        Ok::<_, CommonError>(report)
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/catalog/{{id}}/publish", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "MCP catalog entry id")),
    responses(
        (status = 200, description = "Catalog entry published", body = McpCatalogEntry),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
        (status = 404, description = "Not found", body = CommonError),
        (status = 422, description = "Entry failed validation", body = CommonError),
    ),
)]
async fn route_publish(
    State(service): State<GatewayService>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> JsonResponse<McpCatalogEntry, CommonError> {
    let result = async {
        require_admin(&service.identity, &headers).await?;
        let mut entry = service.catalog.get_by_id(&parse_id(id)?).await?;
        if entry.validation_status != ValidationStatus::Valid {
            let report = validate_mcp_config(&entry);
            if !report.valid {
                return Err(CommonError::Unprocessable { msg: format!("entry failed validation: {}", report.errors.join("; ")) });
            }
            entry.validation_status = ValidationStatus::Valid;
        }
        entry.status = McpStatus::Published;
        entry.updated_at = WrappedChronoDateTime::now();
        service.catalog.update(&entry).await?;
        Ok::<_, CommonError>(entry)
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/catalog/{{id}}/archive", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "MCP catalog entry id")),
    responses(
        (status = 200, description = "Catalog entry archived", body = McpCatalogEntry),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
        (status = 404, description = "Not found", body = CommonError),
    ),
)]
async fn route_archive(
    State(service): State<GatewayService>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> JsonResponse<McpCatalogEntry, CommonError> {
    let result = async {
        require_admin(&service.identity, &headers).await?;
        let mut entry = service.catalog.get_by_id(&parse_id(id)?).await?;
        entry.status = McpStatus::Archived;
        entry.updated_at = WrappedChronoDateTime::now();
        service.catalog.update(&entry).await?;
        service.shared_pool.stop_one(&entry.name).await;
        service.user_pool.terminate_for_mcp(&entry.name).await;
        Ok::<_, CommonError>(entry)
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    get,
    path = format!("/{}/admin/catalog/reload/preview", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    responses(
        (status = 200, description = "Pending catalog diff", body = CatalogDiff),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
    ),
)]
async fn route_reload_preview(
    State(service): State<GatewayService>,
    headers: HeaderMap,
) -> JsonResponse<CatalogDiff, CommonError> {
    let result = async {
        require_admin(&service.identity, &headers).await?;
        service.reloader.preview_changes().await
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/catalog/reload/apply", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    responses(
        (status = 200, description = "Reload applied", body = Vec<ApplyResult>),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
        (status = 409, description = "A reload is already in progress", body = CommonError),
    ),
)]
async fn route_reload_apply(
    State(service): State<GatewayService>,
    headers: HeaderMap,
) -> JsonResponse<Vec<ApplyResult>, CommonError> {
    let result = async {
        require_admin(&service.identity, &headers).await?;
        service.reloader.apply().await
    }
    .await;
    JsonResponse::from(result)
}
