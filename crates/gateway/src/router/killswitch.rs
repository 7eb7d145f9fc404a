//! Admin kill-switch toggles: blocks an MCP across every
//! client without touching its catalog row.

use axum::extract::{Path, State};
use http::HeaderMap;
use shared::adapters::openapi::{API_VERSION_TAG, JsonResponse};
use shared::error::CommonError;
use utoipa_axum::{router::OpenApiRouter, routes};

use identity::router::require_admin;

use crate::service::GatewayService;

use super::API_VERSION_1;

const TAG: &str = "kill-switch";

pub fn create_killswitch_routes() -> OpenApiRouter<GatewayService> {
    OpenApiRouter::new()
        .routes(routes!(route_list_blocked))
        .routes(routes!(route_block))
        .routes(routes!(route_unblock))
}

#[utoipa::path(
    get,
    path = format!("/{}/admin/kill-switch", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    responses(
        (status = 200, description = "Currently blocked MCP names", body = Vec<String>),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
    ),
)]
async fn route_list_blocked(
    State(service): State<GatewayService>,
    headers: HeaderMap,
) -> JsonResponse<Vec<String>, CommonError> {
    let result = async {
        require_admin(&service.identity, &headers).await?;
        Ok::<_, CommonError>(service.kill_switch.blocked_mcps())
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/kill-switch/{{mcp_name}}/block", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("mcp_name" = String, Path, description = "MCP name")),
    responses(
        (status = 200, description = "MCP blocked"),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
    ),
)]
async fn route_block(
    State(service): State<GatewayService>,
    headers: HeaderMap,
    Path(mcp_name): Path<String>,
) -> JsonResponse<(), CommonError> {
    let result = async {
        require_admin(&service.identity, &headers).await?;
        service.kill_switch.block(&mcp_name);
        Ok::<_, CommonError>(())
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/admin/kill-switch/{{mcp_name}}/unblock", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("mcp_name" = String, Path, description = "MCP name")),
    responses(
        (status = 200, description = "MCP unblocked"),
        (status = 401, description = "Missing or invalid X-Admin-Key", body = CommonError),
    ),
)]
async fn route_unblock(
    State(service): State<GatewayService>,
    headers: HeaderMap,
    Path(mcp_name): Path<String>,
) -> JsonResponse<(), CommonError> {
    let result = async {
        require_admin(&service.identity, &headers).await?;
        service.kill_switch.unblock(&mcp_name);
        Ok::<_, CommonError>(())
    }
    .await;
    JsonResponse::from(result)
}
