//! Schema-validates downstream MCP configs and tool call arguments.

use std::collections::HashSet;

use regex::Regex;
use serde_json::Value;
use shared::error::CommonError;

use crate::model::{AuthType, McpCatalogEntry, TransportType};

const BLOCKED_ENV_VARS: &[&str] = &["LD_PRELOAD", "LD_LIBRARY_PATH", "NODE_OPTIONS", "NODE_PATH", "PATH"];
const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '`', '$'];
const MAX_DISALLOWED_PATTERN_LEN: usize = 200;

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub validated_at: String,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            validated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.valid = false;
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

fn is_blocked_env_var(name: &str) -> bool {
    name.starts_with("DYLD_") || BLOCKED_ENV_VARS.contains(&name)
}

fn contains_var_syntax_errors(value: &str) -> bool {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            if i + 1 >= bytes.len() || bytes[i + 1] != b'{' {
                return true;
            }
            match value[i + 2..].find('}') {
                Some(rel) if rel > 0 => i += 2 + rel + 1,
                _ => return true,
            }
        } else {
            i += 1;
        }
    }
    false
}

/// Recursively checks every string leaf of a JSON value for malformed
/// `${VAR}` syntax; resolution happens later, this is a
/// syntax-only check.
fn check_var_syntax(value: &Value, path: &str, report: &mut ValidationReport) {
    match value {
        Value::String(s) => {
            if contains_var_syntax_errors(s) {
                report.error(format!("malformed ${{VAR}} syntax at {path}"));
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                check_var_syntax(item, &format!("{path}[{i}]"), report);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                check_var_syntax(v, &format!("{path}.{k}"), report);
            }
        }
        _ => {}
    }
}

/// `validateMcpConfig(entry)`.
pub fn validate_mcp_config(entry: &McpCatalogEntry) -> ValidationReport {
    let mut report = ValidationReport::new();
    let config = entry.config.get_inner();

    match entry.transport_type {
        TransportType::Stdio => {
            let command = config.get("command");
            match command {
                Some(Value::Array(parts)) if !parts.is_empty() && parts.iter().all(Value::is_string) => {
                    let head = parts[0].as_str().unwrap_or_default();
                    if head.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
                        report.error(format!("command head contains disallowed shell metacharacters: {head}"));
                    }
                }
                _ => report.error("stdio transport requires `command` as a non-empty array of strings"),
            }

            if let Some(env) = config.get("env").and_then(Value::as_object) {
                for key in env.keys() {
                    if is_blocked_env_var(key) {
                        report.error(format!("config may not set blocked environment variable {key}"));
                    }
                }
            }
        }
        TransportType::Http | TransportType::Sse => match config.get("url").and_then(Value::as_str) {
            Some(url) => match url::Url::parse(url) {
                Ok(parsed) => {
                    if parsed.scheme() != "https" {
                        report.warn(format!("url {url} does not use https"));
                    }
                }
                Err(e) => report.error(format!("url does not parse: {e}")),
            },
            None => report.error("http/sse transport requires a `url` string"),
        },
    }

    check_var_syntax(config, "config", &mut report);

    if entry.requires_user_credentials {
        match &entry.credential_schema {
            Some(schema) => {
                let obj = schema.get_inner();
                if obj.get("type").is_none() && obj.get("properties").is_none() {
                    report.error("credential_schema must contain `type` or `properties`");
                }
            }
            None => report.error("requires_user_credentials is set but credential_schema is missing"),
        }
    }

    if let Some(catalog) = entry.tool_catalog.get_inner().as_array() {
        let _ = catalog;
    } else if !entry.tool_catalog.get_inner().is_null() {
        report.error("tool_catalog must be a JSON array");
    }

    if matches!(entry.auth_type, AuthType::Oauth2) && entry.oauth_config.is_none() {
        report.error("auth_type=oauth2 requires oauth_config");
    }

    report
}

/// ReDoS-safe disallowed-pattern matcher: patterns longer than
/// [`MAX_DISALLOWED_PATTERN_LEN`] or containing unbounded nested
/// quantifiers are rejected rather than compiled, and `regex`'s linear-time
/// guarantee (no backtracking engine) bounds the rest.
fn compile_disallowed_pattern(pattern: &str) -> Result<Regex, CommonError> {
    if pattern.len() > MAX_DISALLOWED_PATTERN_LEN {
        return Err(CommonError::ValidationError {
            msg: format!("disallowed pattern exceeds {MAX_DISALLOWED_PATTERN_LEN} chars"),
        });
    }
    Regex::new(pattern).map_err(|e| CommonError::ValidationError { msg: format!("invalid disallowed pattern: {e}") })
}

/// Validates tool-call arguments against `input_schema` plus a caller
/// supplied disallowed-substring/regex list. `input_schema` is a reduced JSON-Schema subset: `type`,
/// `required`, `properties.*.type`, `properties.*.maxLength`.
pub fn validate_tool_arguments(
    input_schema: &Value,
    args: &Value,
    disallowed_patterns: &[String],
) -> Result<(), CommonError> {
    let args_obj = args.as_object().ok_or_else(|| CommonError::TypeMismatch {
        msg: "tool arguments must be a JSON object".to_string(),
    })?;

    if let Some(required) = input_schema.get("required").and_then(Value::as_array) {
        for req in required {
            let Some(name) = req.as_str() else { continue };
            if !args_obj.contains_key(name) {
                return Err(CommonError::MissingRequiredArgument { msg: format!("missing required argument `{name}`") });
            }
        }
    }

    if let Some(properties) = input_schema.get("properties").and_then(Value::as_object) {
        for (name, value) in args_obj {
            let Some(schema) = properties.get(name) else { continue };

            if let Some(expected_type) = schema.get("type").and_then(Value::as_str) {
                if !json_type_matches(expected_type, value) {
                    return Err(CommonError::TypeMismatch {
                        msg: format!("argument `{name}` expected type `{expected_type}`"),
                    });
                }
            }

            if let (Some(max_len), Value::String(s)) = (schema.get("maxLength").and_then(Value::as_u64), value) {
                if s.chars().count() as u64 > max_len {
                    return Err(CommonError::ExceedsMaximumLength {
                        msg: format!("argument `{name}` exceeds maxLength {max_len}"),
                    });
                }
            }
        }
    }

    if !disallowed_patterns.is_empty() {
        let compiled: Result<Vec<Regex>, CommonError> =
            disallowed_patterns.iter().map(|p| compile_disallowed_pattern(p)).collect();
        let compiled = compiled?;
        let flattened = flatten_strings(args);
        for s in &flattened {
            for re in &compiled {
                if re.is_match(s) {
                    return Err(CommonError::DisallowedPattern { msg: format!("argument matched disallowed pattern `{}`", re.as_str()) });
                }
            }
        }
    }

    Ok(())
}

fn json_type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn flatten_strings(value: &Value) -> HashSet<String> {
    let mut out = HashSet::new();
    match value {
        Value::String(s) => {
            out.insert(s.clone());
        }
        Value::Array(items) => {
            for item in items {
                out.extend(flatten_strings(item));
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                out.extend(flatten_strings(v));
            }
        }
        _ => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::primitives::{WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4};

    fn base_entry(config: Value) -> McpCatalogEntry {
        McpCatalogEntry {
            mcp_id: WrappedUuidV4::new(),
            name: "fs".to_string(),
            display_name: "Filesystem".to_string(),
            description: "".to_string(),
            transport_type: TransportType::Stdio,
            config: WrappedJsonValue::new(config),
            isolation_mode: crate::model::IsolationMode::Shared,
            requires_user_credentials: false,
            credential_schema: None,
            tool_catalog: WrappedJsonValue::new(Value::Array(vec![])),
            validation_status: crate::model::ValidationStatus::Pending,
            status: crate::model::McpStatus::Draft,
            auth_type: AuthType::None,
            oauth_config: None,
            timeout_seconds: None,
            created_at: WrappedChronoDateTime::now(),
            updated_at: WrappedChronoDateTime::now(),
        }
    }

    #[test]
    fn rejects_shell_metacharacters_in_command_head() {
        let entry = base_entry(serde_json::json!({ "command": ["node; rm -rf /", "server.js"] }));
        let report = validate_mcp_config(&entry);
        assert!(!report.valid);
    }

    #[test]
    fn rejects_blocked_env_var() {
        let entry = base_entry(serde_json::json!({ "command": ["node"], "env": { "LD_PRELOAD": "x" } }));
        let report = validate_mcp_config(&entry);
        assert!(!report.valid);
    }

    #[test]
    fn accepts_well_formed_stdio_config() {
        let entry = base_entry(serde_json::json!({ "command": ["node", "server.js"] }));
        let report = validate_mcp_config(&entry);
        assert!(report.valid, "{:?}", report.errors);
    }

    #[test]
    fn flags_malformed_var_syntax() {
        let entry = base_entry(serde_json::json!({ "command": ["node"], "env": { "FOO": "${BAR" } }));
        let report = validate_mcp_config(&entry);
        assert!(!report.valid);
    }

    #[test]
    fn tool_arguments_require_declared_required_fields() {
        let schema = serde_json::json!({ "required": ["path"] });
        let err = validate_tool_arguments(&schema, &serde_json::json!({}), &[]).unwrap_err();
        assert!(matches!(err, CommonError::MissingRequiredArgument { .. }));
    }

    #[test]
    fn tool_arguments_disallowed_pattern_matches() {
        let schema = serde_json::json!({});
        let args = serde_json::json!({ "path": "/etc/passwd" });
        let err = validate_tool_arguments(&schema, &args, &["/etc/.*".to_string()]).unwrap_err();
        assert!(matches!(err, CommonError::DisallowedPattern { .. }));
    }
}
