mod admin;
mod catalog;
mod credentials;
mod invoke;
mod killswitch;
mod marketplace;
mod subscriptions;

use utoipa_axum::router::OpenApiRouter;

use crate::service::GatewayService;

pub const API_VERSION_1: &str = "v1";

pub fn create_router() -> OpenApiRouter<GatewayService> {
    OpenApiRouter::new()
        .merge(admin::create_admin_routes())
        .merge(catalog::create_catalog_routes())
        .merge(credentials::create_credential_routes())
        .merge(invoke::create_invoke_routes())
        .merge(killswitch::create_killswitch_routes())
        .merge(marketplace::create_marketplace_routes())
        .merge(subscriptions::create_subscription_routes())
}
