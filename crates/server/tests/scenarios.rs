//! End-to-end scenarios driven through the fully assembled HTTP router.
//! Fixtures are seeded through the real repositories rather than mocks,
//! against an in-memory database built the same way
//! `factory::build_app_state` builds the on-disk one.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use gateway::model::{
    IsolationMode, McpCatalogEntry, McpStatus, Subscription, SubscriptionStatus, TransportType, ValidationStatus,
};
use gateway::repository::{McpCatalogRepositoryLike, SubscriptionRepositoryLike};
use identity::model::{
    Client, ClientStatus, Group, GroupStatus, RateLimits, TimeRestrictions, ToolProfile, User, UserStatus,
};
use identity::repository::{ClientRepositoryLike, GroupRepositoryLike, ToolProfileRepositoryLike, UserRepositoryLike};
use shared::libsql::Connection;
use shared::primitives::{WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4};
use server::factory::{self, AppState};

const ADMIN_KEY_HEADER: &str = "x-admin-key";
const API_KEY_HEADER: &str = "x-api-key";
const CLIENT_ID_HEADER: &str = "x-client-id";
const TEST_PEER: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1)), 0);

async fn build_test_state() -> (AppState, Connection) {
    shared::setup_test!();
    let config = server::config::AppConfig::load().expect("config loads from env");
    let (_db, conn) = shared::test_utils::repository::setup_in_memory_database(vec![factory::merged_migrations()])
        .await
        .expect("in-memory database migrates");
    let state = factory::build_app_state_with_connection(config, conn.clone())
        .await
        .expect("app state builds from the seeded connection");
    (state, conn)
}

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/echo_mcp.py")
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let mut req = req;
    req.extensions_mut().insert(ConnectInfo(TEST_PEER));
    let response = router.clone().oneshot(req).await.expect("router never errors at the service layer");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("readable body").to_bytes();
    let body: Value = if bytes.is_empty() { json!(null) } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn post(uri: &str, headers: &[(&str, &str)], body: Value) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri).header("content-type", "application/json");
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    builder.body(Body::from(serde_json::to_vec(&body).unwrap())).unwrap()
}

async fn seed_user(state: &AppState) -> WrappedUuidV4 {
    let user = User {
        user_id: WrappedUuidV4::new(),
        username: format!("user-{}", uuid::Uuid::new_v4()),
        password_hash: identity::api_key::hash_secret("not used by the scenarios in this file"),
        status: UserStatus::Active,
        vault_salt: vec![0u8; 16],
        display_name: "Test User".to_string(),
        email: None,
        is_admin: false,
        created_at: WrappedChronoDateTime::now(),
        updated_at: WrappedChronoDateTime::now(),
    };
    state.identity.users.create(&user).await.expect("user inserts");
    user.user_id
}

async fn seed_profile(state: &AppState, allowed_tools: Vec<String>) -> WrappedUuidV4 {
    let profile = ToolProfile {
        profile_id: WrappedUuidV4::new(),
        name: format!("profile-{}", uuid::Uuid::new_v4()),
        description: "scenario profile".to_string(),
        allowed_tools,
        denied_tools: Vec::new(),
        rate_limits: RateLimits::default(),
        inherited_from: None,
        environment_scope: None,
        time_restrictions: TimeRestrictions::default(),
    };
    state.identity.profiles.create(&profile).await.expect("profile inserts");
    profile.profile_id
}

/// Registers a client and returns `(client_id, plaintext_key)`, the
/// `X-Client-Id`/`X-Api-Key` pair the AAA pipeline's authenticator expects.
async fn seed_client(state: &AppState, user_id: &WrappedUuidV4, profile_id: &WrappedUuidV4) -> (WrappedUuidV4, String) {
    let generated = identity::api_key::generate_client_key();
    let client = Client {
        client_id: WrappedUuidV4::new(),
        client_name: "scenario-client".to_string(),
        key_prefix: generated.prefix_index.clone(),
        key_hash: generated.hash.clone(),
        user_id: user_id.clone(),
        profile_id: profile_id.clone(),
        status: ClientStatus::Active,
        created_at: WrappedChronoDateTime::now(),
        expires_at: None,
        last_used_at: None,
        metadata: WrappedJsonValue::new(json!({})),
    };
    state.identity.clients.create(&client).await.expect("client inserts");
    (client.client_id, generated.plaintext)
}

/// Publishes a `filesystem` stdio MCP backed by the `echo_mcp.py` fixture,
/// reloads the shared pool so a live connection exists, then subscribes
/// `client_id` to it and grants `user_id` group access — the full set of
/// conditions `ToolRouter::whitelist` checks.
async fn publish_filesystem_mcp(state: &AppState, user_id: &WrappedUuidV4, client_id: &WrappedUuidV4) -> McpCatalogEntry {
    let now = WrappedChronoDateTime::now();
    let entry = McpCatalogEntry {
        mcp_id: WrappedUuidV4::new(),
        name: "filesystem".to_string(),
        display_name: "Filesystem".to_string(),
        description: "scenario fixture".to_string(),
        transport_type: TransportType::Stdio,
        config: WrappedJsonValue::new(json!({
            "command": ["python3", fixture_path().to_str().unwrap()],
        })),
        isolation_mode: IsolationMode::Shared,
        requires_user_credentials: false,
        credential_schema: None,
        tool_catalog: WrappedJsonValue::new(json!([{
            "name": "filesystem.read_file",
            "description": "Reads a file",
            "inputSchema": {
                "type": "object",
                "required": ["path"],
                "properties": { "path": { "type": "string", "maxLength": 1000 } },
            },
        }])),
        validation_status: ValidationStatus::Valid,
        status: McpStatus::Published,
        auth_type: gateway::model::AuthType::None,
        oauth_config: None,
        timeout_seconds: None,
        created_at: now.clone(),
        updated_at: now,
    };
    state.gateway.catalog.create(&entry).await.expect("catalog entry inserts");

    let group = Group {
        group_id: WrappedUuidV4::new(),
        name: format!("group-{}", uuid::Uuid::new_v4()),
        description: "scenario group".to_string(),
        status: GroupStatus::Active,
    };
    state.identity.groups.create(&group).await.expect("group inserts");
    state.identity.groups.add_user_member(&group.group_id, user_id).await.expect("user joins group");
    state.identity.groups.add_mcp_member(&group.group_id, &entry.mcp_id).await.expect("mcp joins group");

    let subscription = Subscription {
        subscription_id: WrappedUuidV4::new(),
        client_id: client_id.clone(),
        mcp_id: entry.mcp_id.clone(),
        selected_tools: Vec::new(),
        status: SubscriptionStatus::Active,
        subscribed_at: WrappedChronoDateTime::now(),
        updated_at: WrappedChronoDateTime::now(),
    };
    state.gateway.subscriptions.create(&subscription).await.expect("subscription inserts");

    state.gateway.reloader.apply().await.expect("reload brings the fixture connection up");
    entry
}

async fn audit_event_types(conn: &Connection) -> Vec<String> {
    let mut rows = conn.query("SELECT event_type FROM audit_events ORDER BY rowid", ()).await.unwrap();
    let mut out = Vec::new();
    while let Some(row) = rows.next().await.unwrap() {
        let event_type: String = row.get(0).unwrap();
        out.push(event_type);
    }
    out
}

#[tokio::test]
async fn s1_happy_path_invoke_permits_and_audits_in_order() {
    let (state, conn) = build_test_state().await;
    let router = server::router::build_router(&state);

    let user_id = seed_user(&state).await;
    let profile_id = seed_profile(&state, vec!["filesystem.*".to_string()]).await;
    let (client_id, api_key) = seed_client(&state, &user_id, &profile_id).await;
    publish_filesystem_mcp(&state, &user_id, &client_id).await;

    let client_id_str = client_id.to_string();
    let headers = [(API_KEY_HEADER, api_key.as_str()), (CLIENT_ID_HEADER, client_id_str.as_str())];
    let body = json!({ "tool_name": "filesystem.read_file", "arguments": { "path": "/tmp/test.txt" } });
    let (status, response) = send(&router, post("/v1/tools/invoke", &headers, body)).await;

    assert_eq!(status, StatusCode::OK, "invoke response: {response}");
    assert_eq!(response["data"]["content"], json!(["File contents: /tmp/test.txt"]));
    assert_eq!(response["data"]["is_error"], json!(false));

    state.gateway.audit.flush().await.unwrap();
    assert_eq!(audit_event_types(&conn).await, vec!["auth_success", "authz_permit", "tool_invocation"]);
}

#[tokio::test]
async fn s2_authz_deny_for_a_tool_outside_the_profile() {
    let (state, conn) = build_test_state().await;
    let router = server::router::build_router(&state);

    let user_id = seed_user(&state).await;
    let profile_id = seed_profile(&state, vec!["filesystem.*".to_string()]).await;
    let (client_id, api_key) = seed_client(&state, &user_id, &profile_id).await;

    let client_id_str = client_id.to_string();
    let headers = [(API_KEY_HEADER, api_key.as_str()), (CLIENT_ID_HEADER, client_id_str.as_str())];
    let body = json!({ "tool_name": "database.execute_query", "arguments": {} });
    let (status, response) = send(&router, post("/v1/tools/invoke", &headers, body)).await;

    assert_eq!(status, StatusCode::FORBIDDEN, "invoke response: {response}");
    assert_eq!(response["error"]["code"], json!("not_authorized"));
    assert!(response["error"]["message"].as_str().unwrap().contains("not in allowed list"));

    state.gateway.audit.flush().await.unwrap();
    assert_eq!(audit_event_types(&conn).await, vec!["auth_success", "authz_deny"]);
}

#[tokio::test]
async fn s3_validation_rejects_an_oversized_argument() {
    let (state, _conn) = build_test_state().await;
    let router = server::router::build_router(&state);

    let user_id = seed_user(&state).await;
    let profile_id = seed_profile(&state, vec!["filesystem.*".to_string()]).await;
    let (client_id, api_key) = seed_client(&state, &user_id, &profile_id).await;
    publish_filesystem_mcp(&state, &user_id, &client_id).await;

    let client_id_str = client_id.to_string();
    let headers = [(API_KEY_HEADER, api_key.as_str()), (CLIENT_ID_HEADER, client_id_str.as_str())];
    let oversized_path = "x".repeat(1001);
    let body = json!({ "tool_name": "filesystem.read_file", "arguments": { "path": oversized_path } });
    let (status, response) = send(&router, post("/v1/tools/invoke", &headers, body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST, "invoke response: {response}");
    assert_eq!(response["error"]["code"], json!("exceeds_maximum_length"));
}

#[tokio::test]
async fn s4_admin_key_recovery_rotates_the_hash_and_invalidates_the_old_key() {
    let (state, _conn) = build_test_state().await;

    let generated = state.identity.admin_keys.generate().await.expect("first boot admin key");
    let before = state.identity.admin_keys.verify(&generated.plaintext).await.expect("initial key verifies");

    let recovery_token_path = state.config.data_dir.join(identity::manager::RECOVERY_TOKEN_FILE_NAME);
    let recovery_token = std::fs::read_to_string(&recovery_token_path).expect("recovery token file was written");

    let recovered = state.identity.admin_keys.recover(&recovery_token).await.expect("recovery succeeds");

    let after = state.identity.admin_keys.verify(&recovered.plaintext).await.expect("new key verifies");
    assert_eq!(before.id, after.id, "recovery preserves the row id");
    assert!(after.rotated_at.is_some(), "rotated_at is stamped on recovery");
    assert!(
        state.identity.admin_keys.verify(&generated.plaintext).await.is_err(),
        "the pre-recovery key must no longer verify"
    );
}

#[tokio::test]
async fn s5_registration_rate_limit_allows_ten_then_rejects_the_eleventh() {
    let (state, _conn) = build_test_state().await;
    let router = server::router::build_router(&state);

    let user_id = seed_user(&state).await;
    let profile_id = seed_profile(&state, vec!["*".to_string()]).await;
    let (client_id, api_key) = seed_client(&state, &user_id, &profile_id).await;
    let client_id_str = client_id.to_string();
    let headers = [(API_KEY_HEADER, api_key.as_str()), (CLIENT_ID_HEADER, client_id_str.as_str())];

    for attempt in 0..10 {
        let (status, response) = send(&router, post("/v1/sessions/register", &headers, json!({}))).await;
        assert_eq!(status, StatusCode::OK, "registration {attempt} response: {response}");
    }

    let (status, response) = send(&router, post("/v1/sessions/register", &headers, json!({}))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS, "11th registration response: {response}");
    assert_eq!(response["error"]["code"], json!("rate_limit_exceeded"));
}

#[tokio::test]
async fn s6_concurrent_catalog_reload_serializes_to_one_winner() {
    let (state, _conn) = build_test_state().await;
    let router = server::router::build_router(&state);

    let admin_key = state.identity.admin_keys.generate().await.expect("admin key bootstraps").plaintext;
    let headers = [(ADMIN_KEY_HEADER, admin_key.as_str())];

    let first = router.clone().oneshot({
        let mut req = post("/v1/admin/catalog/reload/apply", &headers, json!(null));
        req.extensions_mut().insert(ConnectInfo(TEST_PEER));
        req
    });
    let second = router.clone().oneshot({
        let mut req = post("/v1/admin/catalog/reload/apply", &headers, json!(null));
        req.extensions_mut().insert(ConnectInfo(TEST_PEER));
        req
    });

    let (first, second) = tokio::join!(first, second);
    let statuses: Vec<StatusCode> = vec![first.unwrap().status(), second.unwrap().status()];

    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1, "{statuses:?}");
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count(), 1, "{statuses:?}");
}
