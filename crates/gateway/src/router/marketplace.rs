//! Read-only, session-gated view of published MCPs a user can subscribe to.
//! Deliberately narrower than the admin catalog: no transport config,
//! tool catalog, or lifecycle metadata leaks here.

use axum::Json;
use axum::extract::{Path, State};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use shared::adapters::openapi::{API_VERSION_TAG, JsonResponse};
use shared::error::CommonError;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use identity::router::require_user_session;

use crate::model::{AuthType, McpCatalogEntry, McpStatus};
use crate::service::GatewayService;

use super::API_VERSION_1;
use super::catalog::parse_id as parse_mcp_id;

const TAG: &str = "marketplace";

pub fn create_marketplace_routes() -> OpenApiRouter<GatewayService> {
    OpenApiRouter::new().routes(routes!(route_marketplace_list)).routes(routes!(route_marketplace_get))
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MarketplaceEntry {
    pub mcp_id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub requires_user_credentials: bool,
    pub auth_type: AuthType,
}

impl From<McpCatalogEntry> for MarketplaceEntry {
    fn from(entry: McpCatalogEntry) -> Self {
        Self {
            mcp_id: entry.mcp_id.to_string(),
            name: entry.name,
            display_name: entry.display_name,
            description: entry.description,
            requires_user_credentials: entry.requires_user_credentials,
            auth_type: entry.auth_type,
        }
    }
}

#[utoipa::path(
    get,
    path = format!("/{}/marketplace", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    responses(
        (status = 200, description = "Published MCPs available for subscription", body = Vec<MarketplaceEntry>),
        (status = 401, description = "No valid session", body = CommonError),
    ),
)]
async fn route_marketplace_list(
    State(service): State<GatewayService>,
    jar: CookieJar,
) -> JsonResponse<Vec<MarketplaceEntry>, CommonError> {
    let result = async {
        require_user_session(&service.identity, &jar).await?;
        let published = service.catalog.list_by_status(McpStatus::Published).await?;
        Ok::<_, CommonError>(published.into_iter().map(MarketplaceEntry::from).collect())
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    get,
    path = format!("/{}/marketplace/{{id}}", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "MCP catalog entry id")),
    responses(
        (status = 200, description = "Published MCP", body = MarketplaceEntry),
        (status = 401, description = "No valid session", body = CommonError),
        (status = 404, description = "Not found or not published", body = CommonError),
    ),
)]
async fn route_marketplace_get(
    State(service): State<GatewayService>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> JsonResponse<MarketplaceEntry, CommonError> {
    let result = async {
        require_user_session(&service.identity, &jar).await?;
        let mcp_id = parse_mcp_id(id)?;
        let entry = service.catalog.get_by_id(&mcp_id).await?;
        if entry.status != McpStatus::Published {
            return Err(CommonError::NotFound {
                msg: "mcp is not published".to_string(),
                lookup_id: mcp_id.to_string(),
                source: None,
            });
        }
        Ok::<_, CommonError>(MarketplaceEntry::from(entry))
    }
    .await;
    JsonResponse::from(result)
}
