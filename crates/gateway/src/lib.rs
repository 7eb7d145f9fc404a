pub mod connection;
pub mod kill_switch;
pub mod model;
pub mod reloader;
pub mod repository;
pub mod router;
pub mod service;
pub mod shared_pool;
pub mod tool_router;
pub mod user_pool;
pub mod validation;

pub use kill_switch::KillSwitchRegistry;
pub use reloader::CatalogReloader;
pub use shared_pool::SharedMcpManager;
pub use tool_router::ToolRouter;
pub use user_pool::{PerUserMcpPool, UserPoolConfig};

pub fn load_sql_migrations() -> shared::libsql::Migrations<'static> {
    shared_macros::load_sql_migrations!("migrations")
}
