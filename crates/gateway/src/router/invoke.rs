//! The AAA pipeline's HTTP surface: authenticate via
//! `X-Api-Key`/`X-Client-Id`, authorize against the caller's effective tool
//! profile, validate arguments, invoke, and audit every stage.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::State;
use dashmap::DashMap;
use http::HeaderMap;
use serde::Deserialize;
use shared::adapters::openapi::{API_VERSION_TAG, JsonResponse};
use shared::error::CommonError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use audit::{AuditEventBuilder, EventType, ResponseSummary};
use identity::aaa::SessionContext;
use identity::authz::{self, AuthzDecision};
use identity::rate_limiter::{RateLimiter, RateLimiterConfig};

use crate::connection::ToolInvocationResult;
use crate::service::GatewayService;
use crate::tool_router::CatalogEntryView;
use crate::validation::validate_tool_arguments;

use super::API_VERSION_1;

const TAG: &str = "invoke";
const DEFAULT_RPM: u32 = 60;
const CONCURRENCY_WAIT: Duration = Duration::from_millis(500);

pub fn create_invoke_routes() -> OpenApiRouter<GatewayService> {
    OpenApiRouter::new()
        .routes(routes!(route_catalog))
        .routes(routes!(route_invoke))
}

#[utoipa::path(
    get,
    path = format!("/{}/tools/catalog", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    responses(
        (status = 200, description = "Isolation-aware tool catalog visible to the caller", body = Vec<CatalogEntryView>),
        (status = 401, description = "Authentication failed", body = CommonError),
    ),
)]
async fn route_catalog(
    State(service): State<GatewayService>,
    headers: HeaderMap,
) -> JsonResponse<Vec<CatalogEntryView>, CommonError> {
    let result = async {
        let session = authenticate(&service, &headers).await?;
        service.tool_router.isolation_aware_tool_catalog(&session.user_id, &session.client_id).await
    }
    .await;
    JsonResponse::from(result)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InvokeToolRequest {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Profile-scoped sliding windows, one [`RateLimiter`] per `profile_id`
/// lazily built from that profile's `rate_limits.rpm`. A single shared
/// instance can't carry per-profile config, so each profile gets its own.
fn profile_limiters() -> &'static DashMap<String, RateLimiter> {
    static LIMITERS: std::sync::OnceLock<DashMap<String, RateLimiter>> = std::sync::OnceLock::new();
    LIMITERS.get_or_init(DashMap::new)
}

fn check_rate_limit(profile_id: &str, rpm: Option<u32>, client_id: &str) -> Result<(), CommonError> {
    let profile_limiters = profile_limiters();
    if !profile_limiters.contains_key(profile_id) {
        let config = RateLimiterConfig {
            window: std::time::Duration::from_secs(60),
            max_requests: rpm.unwrap_or(DEFAULT_RPM),
            progressive_backoff: false,
        };
        profile_limiters.entry(profile_id.to_string()).or_insert_with(|| RateLimiter::new(config));
    }
    profile_limiters.get(profile_id).unwrap().check(client_id)
}

/// Per-profile [`Semaphore`], one per `profile_id` lazily sized from that
/// profile's `rate_limits.max_concurrent` the first time it's seen.
fn concurrency_limiters() -> &'static DashMap<String, Arc<Semaphore>> {
    static LIMITERS: std::sync::OnceLock<DashMap<String, Arc<Semaphore>>> = std::sync::OnceLock::new();
    LIMITERS.get_or_init(DashMap::new)
}

/// `None` means the profile has no `max_concurrent` bound and no permit is
/// needed. Waits up to [`CONCURRENCY_WAIT`] for a free slot before failing
/// with `rate_limit_exceeded`.
async fn acquire_concurrency_permit(
    profile_id: &str,
    max_concurrent: Option<u32>,
) -> Result<Option<OwnedSemaphorePermit>, CommonError> {
    let Some(max_concurrent) = max_concurrent else { return Ok(None) };
    let limiters = concurrency_limiters();
    let semaphore = limiters
        .entry(profile_id.to_string())
        .or_insert_with(|| Arc::new(Semaphore::new(max_concurrent as usize)))
        .clone();

    match tokio::time::timeout(CONCURRENCY_WAIT, semaphore.acquire_owned()).await {
        Ok(Ok(permit)) => Ok(Some(permit)),
        _ => Err(CommonError::RateLimitExceeded {
            msg: format!("profile {profile_id} exceeded max_concurrent={max_concurrent}"),
            retry_after_ms: Some(CONCURRENCY_WAIT.as_millis() as u64),
        }),
    }
}

async fn authenticate(service: &GatewayService, headers: &HeaderMap) -> Result<SessionContext, CommonError> {
    match service.identity.authenticator.authenticate(headers).await {
        Ok(session) => {
            service.audit.add(
                AuditEventBuilder::new(EventType::AuthSuccess, "authenticate")
                    .session_id(session.session_id.to_string())
                    .client_id(session.client_id.to_string())
                    .user_id(session.user_id.to_string())
                    .build(),
            );
            Ok(session)
        }
        Err(e) => {
            service.audit.add(
                AuditEventBuilder::new(EventType::AuthFailure, "authenticate")
                    .metadata(serde_json::json!({ "error": e.code() }))
                    .build(),
            );
            Err(e)
        }
    }
}

#[utoipa::path(
    post,
    path = format!("/{}/tools/invoke", API_VERSION_1),
    tags = [TAG, API_VERSION_TAG],
    request_body = InvokeToolRequest,
    responses(
        (status = 200, description = "Tool invocation result", body = ToolInvocationResult),
        (status = 401, description = "Authentication failed", body = CommonError),
        (status = 403, description = "Denied by the caller's tool profile", body = CommonError),
        (status = 404, description = "Tool not on the caller's whitelist", body = CommonError),
        (status = 429, description = "Rate limit exceeded", body = CommonError),
    ),
)]
async fn route_invoke(
    State(service): State<GatewayService>,
    headers: HeaderMap,
    Json(body): Json<InvokeToolRequest>,
) -> JsonResponse<ToolInvocationResult, CommonError> {
    JsonResponse::from(invoke_pipeline(&service, &headers, body).await)
}

/// Emits exactly one audit event per failing stage (each under its own
/// `action`), plus the final `tool_invocation` event on dispatch. A session
/// that never authenticates only ever produces the `authenticate` event.
async fn invoke_pipeline(
    service: &GatewayService,
    headers: &HeaderMap,
    body: InvokeToolRequest,
) -> Result<ToolInvocationResult, CommonError> {
    let session = authenticate(service, headers).await?;

    if let Err(e) = check_rate_limit(&session.profile_id.to_string(), None, &session.client_id.to_string()) {
        audit_stage_failure(service, &session, "rate_limit", &e);
        return Err(e);
    }

    let effective = authz::resolve_effective_profile(service.identity.profiles.as_ref(), &session.profile_id).await?;
    match authz::evaluate(&effective, &body.tool_name, &session.profile_id.to_string()) {
        AuthzDecision::Permit => {
            service.audit.add(
                AuditEventBuilder::new(EventType::AuthzPermit, "authorize")
                    .session_id(session.session_id.to_string())
                    .client_id(session.client_id.to_string())
                    .user_id(session.user_id.to_string())
                    .authz("permit", Some(session.profile_id.to_string()))
                    .metadata(serde_json::json!({ "tool_name": &body.tool_name }))
                    .build(),
            );
        }
        AuthzDecision::Deny { reason, policy_id } => {
            service.audit.add(
                AuditEventBuilder::new(EventType::AuthzDeny, "authorize")
                    .session_id(session.session_id.to_string())
                    .client_id(session.client_id.to_string())
                    .user_id(session.user_id.to_string())
                    .authz("deny", Some(policy_id.clone()))
                    .metadata(serde_json::json!({ "tool_name": &body.tool_name, "reason": reason.clone() }))
                    .build(),
            );
            return Err(CommonError::NotAuthorized { msg: reason, policy_id: Some(policy_id) });
        }
    }

    let catalog = service.tool_router.isolation_aware_tool_catalog(&session.user_id, &session.client_id).await?;
    let entry = match catalog.iter().find(|e| e.tool_name == body.tool_name) {
        Some(entry) => entry,
        None => {
            let e = CommonError::NotFound {
                msg: "tool_not_found".to_string(),
                lookup_id: body.tool_name.clone(),
                source: None,
            };
            audit_stage_failure(service, &session, "tool_lookup", &e);
            return Err(e);
        }
    };

    if let Err(e) = validate_tool_arguments(&entry.input_schema, &body.arguments, &entry.disallowed_patterns) {
        audit_stage_failure(service, &session, "validation", &e);
        return Err(e);
    }

    let _permit = match acquire_concurrency_permit(&session.profile_id.to_string(), effective.rate_limits.max_concurrent).await {
        Ok(permit) => permit,
        Err(e) => {
            audit_stage_failure(service, &session, "concurrency_limit", &e);
            return Err(e);
        }
    };

    let start = Instant::now();
    let result = service.tool_router.invoke(&session.user_id, &session.client_id, &body.tool_name, body.arguments).await;

    match &result {
        Ok(value) => {
            service.audit.add(
                AuditEventBuilder::new(EventType::ToolInvocation, "invoke_tool")
                    .session_id(session.session_id.to_string())
                    .client_id(session.client_id.to_string())
                    .user_id(session.user_id.to_string())
                    .response_summary(ResponseSummary {
                        duration_ms: start.elapsed().as_millis() as u64,
                        size: serde_json::to_vec(&value.content).ok().map(|b| b.len() as u64),
                        is_error: value.is_error,
                    })
                    .build(),
            );
        }
        Err(e) => audit_stage_failure(service, &session, "invoke_tool", e),
    }

    result
}

fn audit_stage_failure(service: &GatewayService, session: &SessionContext, action: &'static str, error: &CommonError) {
    service.audit.add(
        AuditEventBuilder::new(EventType::Error, action)
            .session_id(session.session_id.to_string())
            .client_id(session.client_id.to_string())
            .user_id(session.user_id.to_string())
            .metadata(serde_json::json!({ "error": error.code() }))
            .build(),
    );
}
