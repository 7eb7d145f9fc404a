//! Persistence for flushed audit events (the C1 slice this crate owns).

use async_trait::async_trait;
use shared::error::CommonError;
use shared::libsql::Connection;
use shared::primitives::{WrappedChronoDateTime, WrappedJsonValue, WrappedUuidV4};

use crate::event::{AuditEvent, EventType, ResponseSummary, Severity};

#[async_trait]
pub trait AuditRepositoryLike: Send + Sync {
    async fn insert_batch(&self, events: &[AuditEvent]) -> Result<(), CommonError>;
}

pub struct SqliteAuditRepository {
    conn: Connection,
}

impl SqliteAuditRepository {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

fn event_type_str(event_type: EventType) -> &'static str {
    event_type.as_str()
}

fn severity_str(severity: Severity) -> &'static str {
    severity.as_str()
}

#[async_trait]
impl AuditRepositoryLike for SqliteAuditRepository {
    async fn insert_batch(&self, events: &[AuditEvent]) -> Result<(), CommonError> {
        if events.is_empty() {
            return Ok(());
        }

        for event in events {
            let response_summary = event
                .response_summary
                .as_ref()
                .map(|s| serde_json::to_string(s))
                .transpose()
                .map_err(CommonError::from)?;

            self.conn
                .execute(
                    "INSERT INTO audit_events (
                        event_id, timestamp, event_type, severity, session_id, client_id,
                        user_id, source_ip, action, authz_decision, authz_policy, metadata,
                        response_summary
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    libsql::params![
                        event.event_id.to_string(),
                        WrappedChronoDateTime::from(*event.timestamp.get_inner()).to_string(),
                        event_type_str(event.event_type),
                        severity_str(event.severity),
                        event.session_id.clone(),
                        event.client_id.clone(),
                        event.user_id.clone(),
                        event.source_ip.clone(),
                        event.action.clone(),
                        event.authz_decision.clone(),
                        event.authz_policy.clone(),
                        serde_json::to_string(event.metadata.get_inner())
                            .map_err(CommonError::from)?,
                        response_summary,
                    ],
                )
                .await
                .map_err(CommonError::from)?;
        }

        Ok(())
    }
}

/// Reconstructs an [`AuditEvent`] from a persisted row. Used by admin
/// audit-log read endpoints (out of core scope beyond this helper, kept for
/// completeness of the repository layer).
pub fn row_to_event(row: &libsql::Row) -> Result<AuditEvent, CommonError> {
    let event_id: String = row.get(0).map_err(CommonError::from)?;
    let timestamp: String = row.get(1).map_err(CommonError::from)?;
    let event_type: String = row.get(2).map_err(CommonError::from)?;
    let severity: String = row.get(3).map_err(CommonError::from)?;
    let session_id: Option<String> = row.get(4).map_err(CommonError::from)?;
    let client_id: Option<String> = row.get(5).map_err(CommonError::from)?;
    let user_id: Option<String> = row.get(6).map_err(CommonError::from)?;
    let source_ip: Option<String> = row.get(7).map_err(CommonError::from)?;
    let action: String = row.get(8).map_err(CommonError::from)?;
    let authz_decision: Option<String> = row.get(9).map_err(CommonError::from)?;
    let authz_policy: Option<String> = row.get(10).map_err(CommonError::from)?;
    let metadata: String = row.get(11).map_err(CommonError::from)?;
    let response_summary: Option<String> = row.get(12).map_err(CommonError::from)?;

    Ok(AuditEvent {
        event_id: WrappedUuidV4::try_from(event_id).map_err(CommonError::from)?,
        timestamp: WrappedChronoDateTime::try_from(timestamp.as_str()).map_err(CommonError::from)?,
        event_type: parse_event_type(&event_type)?,
        severity: parse_severity(&severity)?,
        session_id,
        client_id,
        user_id,
        source_ip,
        action,
        authz_decision,
        authz_policy,
        metadata: WrappedJsonValue::new(
            serde_json::from_str(&metadata).map_err(CommonError::from)?,
        ),
        response_summary: response_summary
            .map(|s| serde_json::from_str::<ResponseSummary>(&s))
            .transpose()
            .map_err(CommonError::from)?,
    })
}

fn parse_event_type(s: &str) -> Result<EventType, CommonError> {
    Ok(match s {
        "auth_success" => EventType::AuthSuccess,
        "auth_failure" => EventType::AuthFailure,
        "authz_permit" => EventType::AuthzPermit,
        "authz_deny" => EventType::AuthzDeny,
        "tool_invocation" => EventType::ToolInvocation,
        "admin_action" => EventType::AdminAction,
        "error" => EventType::Error,
        other => {
            return Err(CommonError::Internal {
                source: anyhow::anyhow!("unknown event_type in audit_events row: {other}"),
            });
        }
    })
}

fn parse_severity(s: &str) -> Result<Severity, CommonError> {
    Ok(match s {
        "info" => Severity::Info,
        "warn" => Severity::Warn,
        "error" => Severity::Error,
        "critical" => Severity::Critical,
        other => {
            return Err(CommonError::Internal {
                source: anyhow::anyhow!("unknown severity in audit_events row: {other}"),
            });
        }
    })
}
