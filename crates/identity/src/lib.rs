pub mod aaa;
pub mod api_key;
pub mod authz;
pub mod manager;
pub mod model;
pub mod rate_limiter;
pub mod repository;
pub mod router;
pub mod service;
pub mod session;

pub use aaa::{ApiKeyAuthenticator, SessionContext};
pub use authz::{AuthzDecision, EffectiveProfile};
pub use manager::AdminKeyManager;
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use session::SessionSecret;

pub fn load_sql_migrations() -> shared::libsql::Migrations<'static> {
    shared_macros::load_sql_migrations!("migrations")
}
