//! Client MCP subscriptions: which published MCPs (and which of their
//! tools) a client is allowed onto its whitelist.

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

use crate::model::{McpStatus, Subscription, SubscriptionStatus};
use crate::service::GatewayService;

use super::API_VERSION_1;

const TAG: &str = "subscriptions";

pub fn create_subscription_routes() -> OpenApiRouter<GatewayService> {
    OpenApiRouter::new()
        .routes(routes!(route_list_my_subscriptions))
        .routes(routes!(route_list_client_subscriptions))
        .routes(routes!(route_create_subscription))
        .routes(routes!(route_pause_subscription))
        .routes(routes!(route_resume_subscription))
        .routes(routes!(route_delete_subscription))
}

#[utoipa::path(
    get,
    path = format!("/{}/users/me/subscriptions", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    responses(
        (status = 200, description = "Subscriptions across every client owned by the caller", body = Vec<Subscription>),
        (status = 401, description = "No valid session", body = CommonError),
    ),
)]
async fn route_list_my_subscriptions(
    State(service): State<GatewayService>,
    jar: CookieJar,
) -> JsonResponse<Vec<Subscription>, CommonError> {
    let result = async {
        let session = require_user_session(&service.identity, &jar).await?;
        service.subscriptions.list_for_user(&session.user_id).await
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    get,
    path = format!("/{}/users/me/clients/{{client_id}}/subscriptions", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("client_id" = String, Path, description = "Client id")),
    responses(
        (status = 200, description = "Subscriptions owned by the client", body = Vec<Subscription>),
        (status = 401, description = "No valid session", body = CommonError),
        (status = 403, description = "Client belongs to a different user", body = CommonError),
    ),
)]
async fn route_list_client_subscriptions(
    State(service): State<GatewayService>,
    jar: CookieJar,
    Path(client_id): Path<String>,
) -> JsonResponse<Vec<Subscription>, CommonError> {
    let result = async {
        let session = require_user_session(&service.identity, &jar).await?;
        let client_id = parse_client_id(client_id)?;
        require_client_ownership(&service, &session.user_id, &client_id).await?;
        service.subscriptions.list_for_client(&client_id).await
    }
    .await;
    JsonResponse::from(result)
}

fn parse_client_id(id: String) -> Result<WrappedUuidV4, CommonError> {
    WrappedUuidV4::try_from(id).map_err(|_| CommonError::InvalidFormat { msg: "client_id is not a valid UUID".to_string() })
}

fn parse_mcp_id(id: String) -> Result<WrappedUuidV4, CommonError> {
    WrappedUuidV4::try_from(id).map_err(|_| CommonError::InvalidFormat { msg: "mcp_id is not a valid UUID".to_string() })
}

fn parse_sub_id(id: String) -> Result<WrappedUuidV4, CommonError> {
    WrappedUuidV4::try_from(id)
        .map_err(|_| CommonError::InvalidFormat { msg: "subscription_id is not a valid UUID".to_string() })
}

async fn require_client_ownership(
    service: &GatewayService,
    user_id: &WrappedUuidV4,
    client_id: &WrappedUuidV4,
) -> Result<(), CommonError> {
    let client = service.identity.clients.get_by_id(client_id).await?;
    if &client.user_id != user_id {
        return Err(CommonError::Forbidden { msg: "client belongs to a different user".to_string() });
    }
    Ok(())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSubscriptionRequest {
    pub client_id: String,
    pub mcp_id: String,
    #[serde(default)]
    pub selected_tools: Vec<String>,
}

#[utoipa::path(
    post,
    path = format!("/{}/subscriptions", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    request_body = CreateSubscriptionRequest,
    responses(
        (status = 200, description = "Subscription created", body = Subscription),
        (status = 401, description = "No valid session", body = CommonError),
        (status = 403, description = "Client belongs to a different user", body = CommonError),
        (status = 404, description = "MCP not published", body = CommonError),
    ),
)]
async fn route_create_subscription(
    State(service): State<GatewayService>,
    jar: CookieJar,
    Json(body): Json<CreateSubscriptionRequest>,
) -> JsonResponse<Subscription, CommonError> {
    let result = async {
        let session = require_user_session(&service.identity, &jar).await?;
        let client_id = parse_client_id(body.client_id)?;
        require_client_ownership(&service, &session.user_id, &client_id).await?;
        let mcp_id = parse_mcp_id(body.mcp_id)?;
        let entry = service.catalog.get_by_id(&mcp_id).await?;
        if entry.status != McpStatus::Published {
            return Err(CommonError::NotFound {
                msg: "mcp is not published".to_string(),
                lookup_id: mcp_id.to_string(),
                source: None,
            });
        }

        let now = WrappedChronoDateTime::now();
        let subscription = Subscription {
            subscription_id: WrappedUuidV4::new(),
            client_id,
            mcp_id,
            selected_tools: body.selected_tools,
            status: SubscriptionStatus::Active,
            subscribed_at: now.clone(),
            updated_at: now,
        };
        service.subscriptions.create(&subscription).await?;
        Ok::<_, CommonError>(subscription)
    }
    .await;
    JsonResponse::from(result)
}

async fn set_subscription_status(
    service: &GatewayService,
    user_id: &WrappedUuidV4,
    subscription_id: WrappedUuidV4,
    status: SubscriptionStatus,
) -> Result<Subscription, CommonError> {
    let mut subscription = service.subscriptions.get_by_id(&subscription_id).await?;
    require_client_ownership(service, user_id, &subscription.client_id).await?;
    subscription.status = status;
    subscription.updated_at = WrappedChronoDateTime::now();
    service.subscriptions.update(&subscription).await?;
    Ok(subscription)
}

#[utoipa::path(
    post,
    path = format!("/{}/subscriptions/{{id}}/pause", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "Subscription id")),
    responses(
        (status = 200, description = "Subscription paused", body = Subscription),
        (status = 401, description = "No valid session", body = CommonError),
        (status = 403, description = "Client belongs to a different user", body = CommonError),
    ),
)]
async fn route_pause_subscription(
    State(service): State<GatewayService>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> JsonResponse<Subscription, CommonError> {
    let result = async {
        let session = require_user_session(&service.identity, &jar).await?;
        set_subscription_status(&service, &session.user_id, parse_sub_id(id)?, SubscriptionStatus::Paused).await
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/subscriptions/{{id}}/resume", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "Subscription id")),
    responses(
        (status = 200, description = "Subscription resumed", body = Subscription),
        (status = 401, description = "No valid session", body = CommonError),
        (status = 403, description = "Client belongs to a different user", body = CommonError),
    ),
)]
async fn route_resume_subscription(
    State(service): State<GatewayService>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> JsonResponse<Subscription, CommonError> {
    let result = async {
        let session = require_user_session(&service.identity, &jar).await?;
        set_subscription_status(&service, &session.user_id, parse_sub_id(id)?, SubscriptionStatus::Active).await
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    delete,
    path = format!("/{}/subscriptions/{{id}}", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    params(("id" = String, Path, description = "Subscription id")),
    responses(
        (status = 200, description = "Subscription deleted"),
        (status = 401, description = "No valid session", body = CommonError),
        (status = 403, description = "Client belongs to a different user", body = CommonError),
    ),
)]
async fn route_delete_subscription(
    State(service): State<GatewayService>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> JsonResponse<(), CommonError> {
    let result = async {
        let session = require_user_session(&service.identity, &jar).await?;
        let subscription_id = parse_sub_id(id)?;
        let subscription = service.subscriptions.get_by_id(&subscription_id).await?;
        require_client_ownership(&service, &session.user_id, &subscription.client_id).await?;
        service.subscriptions.delete(&subscription_id).await
    }
    .await;
    JsonResponse::from(result)
}
