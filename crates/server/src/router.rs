//! Merges the identity and gateway crates' routers into one axum
//! [`Router`] via `split_for_parts` + `with_state` + `merge`.

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::openapi::OpenApi;

use crate::factory::AppState;

pub fn build_router(state: &AppState) -> Router {
    let (identity_router, _) = identity::router::create_router().split_for_parts();
    let identity_router = identity_router.with_state(state.identity.clone());

    let (gateway_router, _) = gateway::router::create_router().split_for_parts();
    let gateway_router = gateway_router.with_state(state.gateway.clone());

    Router::new()
        .merge(identity_router)
        .merge(gateway_router)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Assembled independently of any axum state, purely for documentation
/// generation.
pub fn generate_openapi_spec() -> OpenApi {
    let (_, mut spec) = identity::router::create_router().split_for_parts();
    let (_, gateway_spec) = gateway::router::create_router().split_for_parts();
    spec.merge(gateway_spec);
    spec
}
