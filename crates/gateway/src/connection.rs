//! A single long-lived conversation with one downstream tool server, stdio
//! or HTTP/SSE transport, speaking JSON-RPC 2.0.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::error::CommonError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, oneshot, RwLock};
use tokio::time::timeout;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-invocation deadline used when a catalog entry doesn't declare its own.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_DRAIN: Duration = Duration::from_secs(5);
const STDERR_TAIL_LINES: usize = 64;
const MAX_HTTP_BODY_BYTES: usize = 10 * 1024 * 1024;
const PROTOCOL_VERSION: &str = "2024-11-05";

const BLOCKED_ENV_VARS: &[&str] = &["LD_PRELOAD", "LD_LIBRARY_PATH", "NODE_OPTIONS", "NODE_PATH", "PATH"];
const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '`', '$'];

fn tool_name_pattern() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]{0,63}$").unwrap())
}

fn is_blocked_env_var(name: &str) -> bool {
    name.starts_with("DYLD_") || BLOCKED_ENV_VARS.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Starting,
    Connected,
    Refreshing,
    Disconnected,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connect { mcp_name: String },
    Disconnect { mcp_name: String, reason: String },
    Error { mcp_name: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ToolInvocationResult {
    pub content: Value,
    pub is_error: bool,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub mcp_name: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum TransportConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        cwd: Option<String>,
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        headers: HashMap<String, String>,
    },
    Sse {
        url: String,
        headers: HashMap<String, String>,
    },
}

/// Substitutes `${VAR}` placeholders in `template` with values from
/// `credentials` (a flat JSON object). Unresolved placeholders are left
/// untouched rather than erroring, since some may refer to environment
/// variables the process itself already carries.
fn substitute_vars(template: &str, credentials: Option<&Value>) -> String {
    let Some(obj) = credentials.and_then(Value::as_object) else { return template.to_string() };

    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && template[i + 1..].starts_with('{') {
            if let Some(rel) = template[i + 2..].find('}') {
                let var_name = &template[i + 2..i + 2 + rel];
                if let Some(value) = obj.get(var_name).and_then(Value::as_str) {
                    out.push_str(value);
                    i += 2 + rel + 1;
                    continue;
                }
            }
        }
        out.push(template[i..].chars().next().unwrap());
        i += template[i..].chars().next().unwrap().len_utf8();
    }
    out
}

/// Builds a [`TransportConfig`] from a catalog entry's `config` blob,
/// resolving any `${VAR}` placeholders against the user's decrypted
/// credentials.
pub fn build_transport_config(
    transport_type: crate::model::TransportType,
    config: &Value,
    credentials: Option<&Value>,
) -> Result<TransportConfig, CommonError> {
    match transport_type {
        crate::model::TransportType::Stdio => {
            let command = config
                .get("command")
                .and_then(Value::as_array)
                .and_then(|parts| parts.first())
                .and_then(Value::as_str)
                .ok_or_else(|| CommonError::ValidationError { msg: "stdio config missing command[0]".to_string() })?
                .to_string();
            let args = config
                .get("command")
                .and_then(Value::as_array)
                .map(|parts| {
                    parts
                        .iter()
                        .skip(1)
                        .filter_map(Value::as_str)
                        .map(|s| substitute_vars(s, credentials))
                        .collect()
                })
                .unwrap_or_default();
            let cwd = config.get("cwd").and_then(Value::as_str).map(String::from);
            let env = config
                .get("env")
                .and_then(Value::as_object)
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), substitute_vars(s, credentials))))
                        .collect()
                })
                .unwrap_or_default();
            Ok(TransportConfig::Stdio { command, args, cwd, env })
        }
        crate::model::TransportType::Http | crate::model::TransportType::Sse => {
            let url = config
                .get("url")
                .and_then(Value::as_str)
                .ok_or_else(|| CommonError::ValidationError { msg: "http/sse config missing url".to_string() })?
                .to_string();
            let headers = config
                .get("headers")
                .and_then(Value::as_object)
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), substitute_vars(s, credentials))))
                        .collect()
                })
                .unwrap_or_default();
            Ok(if matches!(transport_type, crate::model::TransportType::Sse) {
                TransportConfig::Sse { url, headers }
            } else {
                TransportConfig::Http { url, headers }
            })
        }
    }
}

impl TransportConfig {
    /// Rejects shell metacharacters in the command head and any attempt to
    /// smuggle a blocked env var through the declared config.
    pub fn validate(&self) -> Result<(), CommonError> {
        if let TransportConfig::Stdio { command, env, .. } = self {
            if command.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
                return Err(CommonError::ValidationError {
                    msg: format!("command contains disallowed shell metacharacters: {command}"),
                });
            }
            for key in env.keys() {
                if is_blocked_env_var(key) {
                    return Err(CommonError::ValidationError {
                        msg: format!("config may not set blocked environment variable {key}"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Redacts credential-bearing query parameters before a URL is logged.
pub fn redact_url(raw: &str) -> String {
    const CREDENTIAL_PARAMS: &[&str] =
        &["apikey", "api_key", "token", "secret", "password", "key", "access_token"];
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            let redacted: Vec<(String, String)> = parsed
                .query_pairs()
                .map(|(k, v)| {
                    if CREDENTIAL_PARAMS.contains(&k.to_lowercase().as_str()) {
                        (k.into_owned(), "***REDACTED***".to_string())
                    } else {
                        (k.into_owned(), v.into_owned())
                    }
                })
                .collect();
            if redacted.is_empty() {
                parsed.set_query(None);
            } else {
                let mut pairs = parsed.query_pairs_mut();
                pairs.clear();
                for (k, v) in &redacted {
                    pairs.append_pair(k, v);
                }
                drop(pairs);
            }
            parsed.to_string()
        }
        Err(_) => "***REDACTED***".to_string(),
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[allow(dead_code)]
    code: i64,
    message: String,
}

struct StdioHandle {
    child: Child,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
    reader_task: tokio::task::JoinHandle<()>,
    stderr_task: tokio::task::JoinHandle<()>,
}

pub struct McpConnection {
    mcp_name: String,
    transport: TransportConfig,
    state: RwLock<ConnectionState>,
    tool_catalog: RwLock<Vec<ToolDescriptor>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    events: broadcast::Sender<ConnectionEvent>,
    stdio: Mutex<Option<StdioHandle>>,
    stdio_stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    http_client: reqwest::Client,
    next_id: AtomicU64,
    call_timeout: Duration,
    pub error_count: AtomicU32,
}

impl McpConnection {
    /// `call_timeout` of `None` falls back to [`DEFAULT_CALL_TIMEOUT`].
    pub fn new(mcp_name: impl Into<String>, transport: TransportConfig, call_timeout: Option<Duration>) -> Self {
        let (events, _rx) = broadcast::channel(64);
        let call_timeout = call_timeout.unwrap_or(DEFAULT_CALL_TIMEOUT);
        Self {
            mcp_name: mcp_name.into(),
            transport,
            state: RwLock::new(ConnectionState::Created),
            tool_catalog: RwLock::new(Vec::new()),
            stderr_tail: Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES))),
            events,
            stdio: Mutex::new(None),
            stdio_stdin: tokio::sync::Mutex::new(None),
            http_client: reqwest::Client::builder()
                .timeout(call_timeout)
                .build()
                .expect("tls-enabled reqwest client"),
            next_id: AtomicU64::new(2),
            call_timeout,
            error_count: AtomicU32::new(0),
        }
    }

    pub fn mcp_name(&self) -> &str {
        &self.mcp_name
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub async fn tool_catalog(&self) -> Vec<ToolDescriptor> {
        self.tool_catalog.read().await.clone()
    }

    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lock().iter().cloned().collect()
    }

    async fn set_state(&self, next: ConnectionState) {
        *self.state.write().await = next;
    }

    async fn fail(&self, reason: impl Into<String>) -> CommonError {
        let reason = reason.into();
        self.set_state(ConnectionState::Disconnected).await;
        self.error_count.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Error {
            mcp_name: self.mcp_name.clone(),
            message: reason.clone(),
        });
        CommonError::UpstreamDisconnected { mcp_name: self.mcp_name.clone() }
    }

    /// Performs the handshake and loads the tool list. Handshake order is
    /// fixed: `initialize` (id=1) -> `notifications/initialized` (no id) ->
    /// `tools/list` (id=2); reordering is a protocol violation.
    pub async fn start(&self) -> Result<(), CommonError> {
        self.transport.validate()?;
        self.set_state(ConnectionState::Starting).await;

        match &self.transport {
            TransportConfig::Stdio { .. } => self.start_stdio().await?,
            TransportConfig::Http { .. } | TransportConfig::Sse { .. } => {}
        }

        let init_params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "ambassador", "version": env!("CARGO_PKG_VERSION") },
        });
        let init_result = timeout(HANDSHAKE_TIMEOUT, self.call("initialize", Some(init_params), Some(1)))
            .await
            .map_err(|_| CommonError::UpstreamTimeout { mcp_name: self.mcp_name.clone() })??;
        let _ = init_result;

        self.notify("notifications/initialized", None).await?;

        self.set_state(ConnectionState::Connected).await;
        let _ = self.events.send(ConnectionEvent::Connect { mcp_name: self.mcp_name.clone() });

        self.refresh_tool_list().await?;
        Ok(())
    }

    async fn start_stdio(&self) -> Result<(), CommonError> {
        let TransportConfig::Stdio { command, args, cwd, env } = &self.transport else {
            unreachable!()
        };

        let mut cmd = Command::new(command);
        cmd.args(args)
            .env_clear()
            .env("PATH", "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in env {
            cmd.env(k, v);
        }
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| CommonError::Internal { source: anyhow::anyhow!("failed to spawn {command}: {e}") })?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>> = Arc::new(Mutex::new(HashMap::new()));

        let reader_pending = pending.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&line) else {
                    tracing::warn!("unparseable downstream message: {line}");
                    continue;
                };
                if let Some(id) = resp.id {
                    if let Some(tx) = reader_pending.lock().remove(&id) {
                        let _ = tx.send(resp);
                    }
                }
            }
        });

        let stderr_tail = self.stderr_tail.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut tail = stderr_tail.lock();
                if tail.len() >= STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        });

        *self.stdio_stdin.lock().await = Some(stdin);
        *self.stdio.lock() = Some(StdioHandle { child, pending, reader_task, stderr_task });
        Ok(())
    }

    async fn call(&self, method: &str, params: Option<Value>, id: Option<u64>) -> Result<Value, CommonError> {
        match &self.transport {
            TransportConfig::Stdio { .. } => self.call_stdio(method, params, id).await,
            TransportConfig::Http { url, headers } => self.call_http(url, headers, method, params, id).await,
            TransportConfig::Sse { url, headers } => self.call_http(url, headers, method, params, id).await,
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), CommonError> {
        match &self.transport {
            TransportConfig::Stdio { .. } => self.write_stdio_message(method, params, None).await,
            TransportConfig::Http { url, headers } | TransportConfig::Sse { url, headers } => {
                let _ = self.call_http(url, headers, method, params, None).await;
                Ok(())
            }
        }
    }

    async fn write_stdio_message(&self, method: &str, params: Option<Value>, id: Option<u64>) -> Result<(), CommonError> {
        let request = JsonRpcRequest { jsonrpc: "2.0", id, method, params };
        let mut line = serde_json::to_string(&request).map_err(CommonError::from)?;
        line.push('\n');

        let mut guard = self.stdio_stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| CommonError::UpstreamDisconnected { mcp_name: self.mcp_name.clone() })?;
        stdin.write_all(line.as_bytes()).await.map_err(CommonError::from)?;
        stdin.flush().await.map_err(CommonError::from)?;
        Ok(())
    }

    async fn call_stdio(&self, method: &str, params: Option<Value>, id: Option<u64>) -> Result<Value, CommonError> {
        let id = id.unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        {
            let guard = self.stdio.lock();
            let handle = guard
                .as_ref()
                .ok_or_else(|| CommonError::UpstreamDisconnected { mcp_name: self.mcp_name.clone() })?;
            handle.pending.lock().insert(id, tx);
        }

        self.write_stdio_message(method, params, Some(id)).await?;

        let resp = timeout(self.call_timeout, rx)
            .await
            .map_err(|_| CommonError::UpstreamTimeout { mcp_name: self.mcp_name.clone() })?
            .map_err(|_| CommonError::UpstreamDisconnected { mcp_name: self.mcp_name.clone() })?;

        if let Some(err) = resp.error {
            return Err(CommonError::ValidationError { msg: format!("downstream error: {}", err.message) });
        }
        Ok(resp.result.unwrap_or(Value::Null))
    }

    async fn call_http(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        method: &str,
        params: Option<Value>,
        id: Option<u64>,
    ) -> Result<Value, CommonError> {
        let id = id.unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::SeqCst));
        let body = JsonRpcRequest { jsonrpc: "2.0", id: Some(id), method, params };

        let mut req = self.http_client.post(url).json(&body);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = req.send().await.map_err(|e| {
            tracing::warn!(url = %redact_url(url), error = %e, "downstream http request failed");
            CommonError::UpstreamDisconnected { mcp_name: self.mcp_name.clone() }
        })?;

        if let Some(len) = resp.content_length() {
            if len as usize > MAX_HTTP_BODY_BYTES {
                return Err(CommonError::ExceedsMaximumLength {
                    msg: format!("downstream response exceeds {MAX_HTTP_BODY_BYTES} bytes"),
                });
            }
        }

        let bytes = resp.bytes().await.map_err(CommonError::from)?;
        if bytes.len() > MAX_HTTP_BODY_BYTES {
            return Err(CommonError::ExceedsMaximumLength {
                msg: format!("downstream response exceeds {MAX_HTTP_BODY_BYTES} bytes"),
            });
        }

        let parsed: JsonRpcResponse = serde_json::from_slice(&bytes).map_err(CommonError::from)?;
        if let Some(err) = parsed.error {
            return Err(CommonError::ValidationError { msg: format!("downstream error: {}", err.message) });
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }

    pub async fn refresh_tool_list(&self) -> Result<(), CommonError> {
        self.set_state(ConnectionState::Refreshing).await;
        let result = self.call("tools/list", None, None).await;
        self.set_state(ConnectionState::Connected).await;

        let result = match result {
            Ok(r) => r,
            Err(e) => {
                return Err(self.fail(format!("tools/list failed: {e}")).await);
            }
        };

        let raw_tools = result.get("tools").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut hygienic = Vec::with_capacity(raw_tools.len());
        for raw in raw_tools {
            let Some(name) = raw.get("name").and_then(Value::as_str) else { continue };
            if !tool_name_pattern().is_match(name) {
                tracing::warn!(mcp = %self.mcp_name, tool = %name, "dropping tool with invalid name");
                continue;
            }
            let mut description = raw.get("description").and_then(Value::as_str).unwrap_or_default().to_string();
            if description.len() > 500 {
                description.truncate(500);
            }
            let input_schema = raw.get("inputSchema").cloned().unwrap_or_else(|| serde_json::json!({"type": "object"}));
            hygienic.push(ToolDescriptor { name: name.to_string(), description, input_schema });
        }

        *self.tool_catalog.write().await = hygienic;
        Ok(())
    }

    pub async fn invoke_tool(&self, tool_name: &str, args: Value) -> Result<ToolInvocationResult, CommonError> {
        let started = std::time::Instant::now();
        let params = serde_json::json!({ "name": tool_name, "arguments": args });
        let result = self.call("tools/call", Some(params), None).await?;

        let content = result.get("content").cloned().unwrap_or(Value::Null);
        let is_error = result.get("isError").and_then(Value::as_bool).unwrap_or(false);
        let duration_ms = started.elapsed().as_millis() as u64;
        Ok(ToolInvocationResult {
            content,
            is_error,
            metadata: serde_json::json!({ "duration_ms": duration_ms, "mcp_server": self.mcp_name }),
        })
    }

    pub async fn health_check(&self) -> HealthStatus {
        match self.call("tools/list", None, None).await {
            Ok(_) => HealthStatus { healthy: true, mcp_name: self.mcp_name.clone(), error: None },
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::SeqCst);
                HealthStatus { healthy: false, mcp_name: self.mcp_name.clone(), error: Some(e.to_string()) }
            }
        }
    }

    /// Graceful close: drop stdin to signal EOF, wait up to `STOP_DRAIN`,
    /// then kill. HTTP/SSE transports have no persistent process to stop.
    pub async fn stop(&self) -> Result<(), CommonError> {
        self.set_state(ConnectionState::Stopping).await;

        self.stdio_stdin.lock().await.take();

        if let Some(mut handle) = self.stdio.lock().take() {
            let wait = timeout(STOP_DRAIN, handle.child.wait()).await;
            if wait.is_err() {
                let _ = handle.child.start_kill();
                let _ = handle.child.wait().await;
            }
            handle.reader_task.abort();
            handle.stderr_task.abort();
        }

        self.set_state(ConnectionState::Stopped).await;
        let _ = self.events.send(ConnectionEvent::Disconnect {
            mcp_name: self.mcp_name.clone(),
            reason: "stopped".to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_name_pattern_rejects_bad_names() {
        assert!(tool_name_pattern().is_match("read_file"));
        assert!(tool_name_pattern().is_match("Read-File2"));
        assert!(!tool_name_pattern().is_match("2read"));
        assert!(!tool_name_pattern().is_match("has space"));
        assert!(!tool_name_pattern().is_match(&"a".repeat(65)));
    }

    #[test]
    fn stdio_transport_rejects_shell_metacharacters() {
        let cfg = TransportConfig::Stdio {
            command: "node; rm -rf /".to_string(),
            args: vec![],
            cwd: None,
            env: HashMap::new(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn stdio_transport_rejects_blocked_env_vars() {
        let mut env = HashMap::new();
        env.insert("LD_PRELOAD".to_string(), "/tmp/evil.so".to_string());
        let cfg = TransportConfig::Stdio { command: "node".to_string(), args: vec![], cwd: None, env };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn redact_url_masks_credential_params() {
        let redacted = redact_url("https://example.com/mcp?api_key=s3cr3t&foo=bar");
        assert!(redacted.contains("***REDACTED***"));
        assert!(!redacted.contains("s3cr3t"));
        assert!(redacted.contains("foo=bar"));
    }
}
