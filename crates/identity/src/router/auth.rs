//! `POST /v1/auth/{login,logout}`, `GET /v1/auth/session`.

use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};
use shared::adapters::openapi::{API_VERSION_TAG, JsonResponse};
use shared::error::CommonError;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::aaa::COMMUNITY_TIER_TTL_SECS;
use crate::api_key;
use crate::model::UserStatus;
use crate::service::IdentityService;
use crate::session;

use super::{API_VERSION_1, SESSION_COOKIE_NAME, require_user_session};

const TAG: &str = "auth";

pub fn create_auth_routes() -> OpenApiRouter<IdentityService> {
    OpenApiRouter::new()
        .routes(routes!(route_login))
        .routes(routes!(route_logout))
        .routes(routes!(route_session))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub expires_at: String,
}

#[utoipa::path(
    post,
    path = format!("/{}/auth/login", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = SessionInfo),
        (status = 401, description = "Invalid credentials", body = CommonError),
        (status = 429, description = "Too many attempts", body = CommonError),
    ),
)]
async fn route_login(
    State(service): State<IdentityService>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Response {
    let result = async {
        service.login_rate_limiter.check(&body.username)?;

        let user = match service.users.get_by_username(&body.username).await? {
            Some(user) => user,
            None => {
                api_key::verify_against_dummy();
                return Err(CommonError::InvalidCredentials {
                    msg: "invalid username or password".to_string(),
                });
            }
        };

        if user.status != UserStatus::Active {
            return Err(CommonError::ClientSuspended {
                msg: "account is not active".to_string(),
            });
        }

        if !api_key::verify_secret(&body.password, &user.password_hash) {
            return Err(CommonError::InvalidCredentials {
                msg: "invalid username or password".to_string(),
            });
        }

        let session = session::issue_session(&service.session_secret, user.user_id.clone(), None, COMMUNITY_TIER_TTL_SECS);
        service.sessions.insert(&session).await?;

        Ok::<_, CommonError>(session)
    }
    .await;

    match result {
        Ok(session) => {
            let cookie = Cookie::build((SESSION_COOKIE_NAME, session.session_id.to_string()))
                .http_only(true)
                .same_site(axum_extra::extract::cookie::SameSite::Strict)
                .path("/")
                .build();
            let info = SessionInfo {
                session_id: session.session_id.to_string(),
                user_id: session.user_id.to_string(),
                expires_at: session.expires_at.to_string(),
            };
            (jar.add(cookie), Json(shared::envelope::Envelope::new(info))).into_response()
        }
        Err(error) => error.into_response(),
    }
}

#[utoipa::path(
    post,
    path = format!("/{}/auth/logout", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    responses(
        (status = 200, description = "Logout successful"),
    ),
)]
async fn route_logout(State(service): State<IdentityService>, jar: CookieJar) -> Response {
    if let Ok(session) = require_user_session(&service, &jar).await {
        let _ = service.sessions.delete(&session.session_id).await;
    }
    (jar.remove(Cookie::from(SESSION_COOKIE_NAME)), Json(shared::envelope::Envelope::new(()))).into_response()
}

#[utoipa::path(
    get,
    path = format!("/{}/auth/session", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    responses(
        (status = 200, description = "Current session", body = SessionInfo),
        (status = 401, description = "No valid session", body = CommonError),
    ),
)]
async fn route_session(State(service): State<IdentityService>, jar: CookieJar) -> JsonResponse<SessionInfo, CommonError> {
    let result = require_user_session(&service, &jar).await.map(|session| SessionInfo {
        session_id: session.session_id.to_string(),
        user_id: session.user_id.to_string(),
        expires_at: session.expires_at.to_string(),
    });
    JsonResponse::from(result)
}
