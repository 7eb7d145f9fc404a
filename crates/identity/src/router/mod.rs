mod admin_keys;
mod auth;
mod clients;
mod groups;
mod guard;
mod sessions;

use utoipa_axum::router::OpenApiRouter;

use crate::service::IdentityService;

pub const API_VERSION_1: &str = "v1";
pub const SESSION_COOKIE_NAME: &str = "ambassador_session";

pub use guard::{require_admin, require_user_session};

pub fn create_router() -> OpenApiRouter<IdentityService> {
    OpenApiRouter::new()
        .merge(admin_keys::create_admin_key_routes())
        .merge(auth::create_auth_routes())
        .merge(clients::create_client_routes())
        .merge(groups::create_group_routes())
        .merge(sessions::create_session_routes())
}
