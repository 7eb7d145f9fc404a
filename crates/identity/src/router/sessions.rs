//! `POST /v1/sessions/{register,heartbeat}`: a client-scoped
//! session lifecycle for long-lived MCP client connections, distinct from
//! the browser cookie flow in [`super::auth`]. Registration reuses the same
//! `X-Api-Key`/`X-Client-Id` proof of identity as the AAA pipeline's
//! authenticator rather than inventing a second credential shape.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, State};
use serde::{Deserialize, Serialize};
use shared::adapters::openapi::{API_VERSION_TAG, JsonResponse};
use shared::error::CommonError;
use shared::primitives::WrappedUuidV4;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::aaa::COMMUNITY_TIER_TTL_SECS;
use crate::model::SessionStatus;
use crate::service::IdentityService;
use crate::session;

use super::API_VERSION_1;

const TAG: &str = "sessions";
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

pub fn create_session_routes() -> OpenApiRouter<IdentityService> {
    OpenApiRouter::new()
        .routes(routes!(route_register))
        .routes(routes!(route_heartbeat))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionTokenResponse {
    pub session_token: String,
    pub expires_at: String,
}

#[utoipa::path(
    post,
    path = format!("/{}/sessions/register", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    responses(
        (status = 200, description = "Session registered", body = SessionTokenResponse),
        (status = 401, description = "Invalid X-Api-Key/X-Client-Id", body = CommonError),
        (status = 429, description = "Too many registrations from this address", body = CommonError),
    ),
)]
async fn route_register(
    State(service): State<IdentityService>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: http::HeaderMap,
) -> JsonResponse<SessionTokenResponse, CommonError> {
    let result = async {
        service.registration_rate_limiter.check(&addr.ip().to_string())?;

        let ctx = service.authenticator.authenticate(&headers).await?;
        let session = session::issue_session(
            &service.session_secret,
            ctx.user_id.clone(),
            Some(ctx.client_id.clone()),
            COMMUNITY_TIER_TTL_SECS,
        );
        service.sessions.insert(&session).await?;

        Ok::<_, CommonError>(SessionTokenResponse {
            session_token: session.session_id.to_string(),
            expires_at: session.expires_at.to_string(),
        })
    }
    .await;
    JsonResponse::from(result)
}

#[utoipa::path(
    post,
    path = format!("/{}/sessions/heartbeat", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    responses(
        (status = 200, description = "Session extended", body = SessionTokenResponse),
        (status = 401, description = "Missing, expired, or unknown X-Session-Token", body = CommonError),
    ),
)]
async fn route_heartbeat(
    State(service): State<IdentityService>,
    headers: http::HeaderMap,
) -> JsonResponse<SessionTokenResponse, CommonError> {
    let result = async {
        let token = headers
            .get(SESSION_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| CommonError::MissingCredentials {
                msg: format!("missing {SESSION_TOKEN_HEADER} header"),
            })?;
        let session_id = WrappedUuidV4::try_from(token.to_string()).map_err(|_| CommonError::InvalidFormat {
            msg: "X-Session-Token is not a valid session id".to_string(),
        })?;

        let session = service.sessions.get_by_id(&session_id).await?;
        if !session::verify_session(&service.session_secret, &session) {
            return Err(CommonError::InvalidCredentials {
                msg: "session expired or invalid".to_string(),
            });
        }
        if session.client_id.is_none() {
            return Err(CommonError::InvalidCredentials {
                msg: "not a client session".to_string(),
            });
        }

        let mut extended = session::extend_session(&service.session_secret, &session, COMMUNITY_TIER_TTL_SECS);
        extended.status = SessionStatus::Active;
        service.sessions.update(&extended).await?;

        Ok::<_, CommonError>(SessionTokenResponse {
            session_token: extended.session_id.to_string(),
            expires_at: extended.expires_at.to_string(),
        })
    }
    .await;
    JsonResponse::from(result)
}
