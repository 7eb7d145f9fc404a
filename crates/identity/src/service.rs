//! Shared axum state for every router in this crate.

use std::path::PathBuf;
use std::sync::Arc;

use crate::aaa::ApiKeyAuthenticator;
use crate::manager::AdminKeyManager;
use crate::rate_limiter::RateLimiter;
use crate::repository::{
    ClientRepositoryLike, GroupRepositoryLike, SessionRepositoryLike, ToolProfileRepositoryLike,
    UserRepositoryLike,
};
use crate::session::SessionSecret;

#[derive(Clone)]
pub struct IdentityService {
    pub users: Arc<dyn UserRepositoryLike>,
    pub clients: Arc<dyn ClientRepositoryLike>,
    pub profiles: Arc<dyn ToolProfileRepositoryLike>,
    pub groups: Arc<dyn GroupRepositoryLike>,
    pub sessions: Arc<dyn SessionRepositoryLike>,
    pub admin_keys: Arc<AdminKeyManager>,
    pub session_secret: Arc<SessionSecret>,
    pub authenticator: Arc<ApiKeyAuthenticator>,
    pub login_rate_limiter: Arc<RateLimiter>,
    /// Keyed by caller IP, guards `/v1/sessions/register` against
    /// credential-stuffing-style enumeration.
    pub registration_rate_limiter: Arc<RateLimiter>,
    /// Backs [`crate::router::admin_keys::route_rotate_hmac_secret`]: the
    /// session-secret file lives under the data dir, not in this struct's
    /// other fields, so rotation needs the path to persist the new value.
    pub data_dir: PathBuf,
}
