//! Admin/user gating shared by every router in this crate.

use axum_extra::extract::cookie::CookieJar;
use http::HeaderMap;
use shared::error::CommonError;

use crate::model::{AdminKey, UserSession};
use crate::service::IdentityService;

use super::SESSION_COOKIE_NAME;

pub async fn require_admin(service: &IdentityService, headers: &HeaderMap) -> Result<AdminKey, CommonError> {
    let key = headers
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CommonError::MissingCredentials {
            msg: "missing X-Admin-Key header".to_string(),
        })?;
    service.admin_keys.verify(key).await
}

/// Validates the session cookie, re-checking the stored HMAC and expiry.
pub async fn require_user_session(service: &IdentityService, jar: &CookieJar) -> Result<UserSession, CommonError> {
    let session_id = jar
        .get(SESSION_COOKIE_NAME)
        .map(|c| c.value().to_string())
        .ok_or_else(|| CommonError::MissingCredentials {
            msg: "missing session cookie".to_string(),
        })?;

    let session_id = shared::primitives::WrappedUuidV4::try_from(session_id).map_err(|_| {
        CommonError::InvalidFormat {
            msg: "malformed session cookie".to_string(),
        }
    })?;

    let session = service.sessions.get_by_id(&session_id).await?;

    if !crate::session::verify_session(&service.session_secret, &session) {
        return Err(CommonError::InvalidCredentials {
            msg: "session expired or invalid".to_string(),
        });
    }

    Ok(session)
}
