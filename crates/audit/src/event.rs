//! The `AuditEvent` shape and its closed enumerations.

use serde::{Deserialize, Serialize};
use shared::primitives::{WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AuthSuccess,
    AuthFailure,
    AuthzPermit,
    AuthzDeny,
    ToolInvocation,
    AdminAction,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AuthSuccess => "auth_success",
            EventType::AuthFailure => "auth_failure",
            EventType::AuthzPermit => "authz_permit",
            EventType::AuthzDeny => "authz_deny",
            EventType::ToolInvocation => "tool_invocation",
            EventType::AdminAction => "admin_action",
            EventType::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

/// `response_summary` on a `tool_invocation` event.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResponseSummary {
    pub duration_ms: u64,
    pub size: Option<u64>,
    pub is_error: bool,
}

/// One immutable audit record. Constructed by the AAA pipeline (C10) at
/// each stage and never mutated after being handed to [`crate::buffer::AuditBuffer::add`].
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    pub event_id: WrappedUuidV4,
    pub timestamp: WrappedChronoDateTime,
    pub event_type: EventType,
    pub severity: Severity,
    pub session_id: Option<String>,
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    pub source_ip: Option<String>,
    pub action: String,
    pub authz_decision: Option<String>,
    pub authz_policy: Option<String>,
    pub metadata: WrappedJsonValue,
    pub response_summary: Option<ResponseSummary>,
}

pub struct AuditEventBuilder {
    event_type: EventType,
    severity: Severity,
    action: String,
    session_id: Option<String>,
    client_id: Option<String>,
    user_id: Option<String>,
    source_ip: Option<String>,
    authz_decision: Option<String>,
    authz_policy: Option<String>,
    metadata: serde_json::Value,
    response_summary: Option<ResponseSummary>,
}

impl AuditEventBuilder {
    pub fn new(event_type: EventType, action: impl Into<String>) -> Self {
        let severity = match event_type {
            EventType::AuthFailure | EventType::AuthzDeny => Severity::Warn,
            EventType::Error => Severity::Error,
            _ => Severity::Info,
        };
        Self {
            event_type,
            severity,
            action: action.into(),
            session_id: None,
            client_id: None,
            user_id: None,
            source_ip: None,
            authz_decision: None,
            authz_policy: None,
            metadata: serde_json::json!({}),
            response_summary: None,
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn source_ip(mut self, source_ip: impl Into<String>) -> Self {
        self.source_ip = Some(source_ip.into());
        self
    }

    pub fn authz(mut self, decision: impl Into<String>, policy: Option<String>) -> Self {
        self.authz_decision = Some(decision.into());
        self.authz_policy = policy;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn response_summary(mut self, summary: ResponseSummary) -> Self {
        self.response_summary = Some(summary);
        self
    }

    pub fn build(self) -> AuditEvent {
        AuditEvent {
            event_id: WrappedUuidV4::new(),
            timestamp: WrappedChronoDateTime::now(),
            event_type: self.event_type,
            severity: self.severity,
            session_id: self.session_id,
            client_id: self.client_id,
            user_id: self.user_id,
            source_ip: self.source_ip,
            action: self.action,
            authz_decision: self.authz_decision,
            authz_policy: self.authz_policy,
            metadata: WrappedJsonValue::new(self.metadata),
            response_summary: self.response_summary,
        }
    }
}
