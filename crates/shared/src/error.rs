use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use utoipa::{IntoResponses, PartialSchema, ToSchema};

pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The stable error taxonomy for the ambassador. Every fallible operation in
/// every crate returns `Result<T, CommonError>`. Each variant owns a stable
/// `code()` string that is part of the public HTTP contract; renaming a
/// variant's Rust name is free, changing its `code()` is a breaking change.
#[derive(Error, Debug, Serialize)]
pub enum CommonError {
    #[error("missing credentials: {msg}")]
    MissingCredentials { msg: String },

    #[error("invalid credential format: {msg}")]
    InvalidFormat { msg: String },

    #[error("invalid credentials")]
    InvalidCredentials { msg: String },

    #[error("client is suspended")]
    ClientSuspended { msg: String },

    #[error("rate limit exceeded")]
    RateLimitExceeded { msg: String, retry_after_ms: Option<u64> },

    #[error("not authorized: {msg}")]
    NotAuthorized { msg: String, policy_id: Option<String> },

    #[error("cyclic profile inheritance detected")]
    CycleDetected { msg: String },

    #[error("validation error: {msg}")]
    ValidationError { msg: String },

    #[error("disallowed pattern matched: {msg}")]
    DisallowedPattern { msg: String },

    #[error("value exceeds maximum length: {msg}")]
    ExceedsMaximumLength { msg: String },

    #[error("type mismatch: {msg}")]
    TypeMismatch { msg: String },

    #[error("missing required argument: {msg}")]
    MissingRequiredArgument { msg: String },

    #[error("not found: {msg}")]
    NotFound {
        msg: String,
        lookup_id: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("conflict: {msg}")]
    Conflict { msg: String },

    #[error("reload already in progress")]
    ReloadInProgress,

    #[error("forbidden: {msg}")]
    Forbidden { msg: String },

    #[error("unprocessable: {msg}")]
    Unprocessable { msg: String },

    #[error("published mcp structural change rejected: {field}")]
    PublishedMcpStructuralChange { field: String },

    #[error("upstream timeout")]
    UpstreamTimeout { mcp_name: String },

    #[error("upstream disconnected")]
    UpstreamDisconnected { mcp_name: String },

    #[error("capacity exceeded")]
    CapacityExceeded { msg: String },

    #[error("shutting down")]
    ShuttingDown,

    #[error("invalid request")]
    InvalidRequest {
        msg: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("internal error")]
    Internal {
        #[serde(skip)]
        #[source]
        source: anyhow::Error,
    },

    #[error("repository error")]
    Repository {
        msg: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("sqlite database error")]
    SqliteError {
        #[serde(skip)]
        #[from]
        #[source]
        source: libsql::Error,
    },

    #[error("tokio channel error")]
    TokioChannelError {
        #[serde(skip)]
        #[source]
        source: DynError,
    },

    #[error("io error")]
    IoError {
        #[serde(skip)]
        #[from]
        #[source]
        source: std::io::Error,
    },

    #[error("url parse error")]
    UrlParseError {
        #[serde(skip)]
        #[from]
        #[source]
        source: url::ParseError,
    },

    #[error("serde json error")]
    SerdeSerializationError {
        #[serde(skip)]
        #[from]
        #[source]
        source: serde_json::Error,
    },

    #[error("axum error")]
    AxumError {
        #[serde(skip)]
        #[from]
        #[source]
        source: axum::Error,
    },

    #[error("address parse error")]
    AddrParseError {
        #[serde(skip)]
        #[from]
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("libsql migration error")]
    LibsqlMigrationError {
        #[serde(skip)]
        #[from]
        #[source]
        source: libsql_migration::errors::LibsqlDirMigratorError,
    },

    #[error("var error")]
    VarError {
        #[serde(skip)]
        #[from]
        #[source]
        source: std::env::VarError,
    },

    #[error("glob set error")]
    GlobSetError {
        #[serde(skip)]
        #[from]
        #[source]
        source: globset::Error,
    },

    #[error("reqwest error")]
    ReqwestError {
        #[serde(skip)]
        #[from]
        #[source]
        source: reqwest::Error,
    },
}

impl From<anyhow::Error> for CommonError {
    fn from(source: anyhow::Error) -> Self {
        CommonError::Internal { source }
    }
}

impl<T: Send + Sync + 'static> From<tokio::sync::mpsc::error::SendError<T>> for CommonError {
    fn from(e: tokio::sync::mpsc::error::SendError<T>) -> Self {
        CommonError::TokioChannelError {
            source: Box::new(e),
        }
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for CommonError {
    fn from(e: tokio::sync::oneshot::error::RecvError) -> Self {
        CommonError::TokioChannelError {
            source: Box::new(e),
        }
    }
}

impl<T: Send + Sync + 'static + std::fmt::Debug> From<tokio::sync::broadcast::error::SendError<T>>
    for CommonError
{
    fn from(e: tokio::sync::broadcast::error::SendError<T>) -> Self {
        CommonError::TokioChannelError {
            source: Box::new(e),
        }
    }
}

impl From<tokio::sync::broadcast::error::RecvError> for CommonError {
    fn from(e: tokio::sync::broadcast::error::RecvError) -> Self {
        CommonError::TokioChannelError {
            source: Box::new(e),
        }
    }
}

impl From<rustls::Error> for CommonError {
    fn from(err: rustls::Error) -> Self {
        CommonError::InvalidRequest {
            msg: "TLS error".to_string(),
            source: Some(anyhow::Error::from(err)),
        }
    }
}

impl CommonError {
    /// The stable string code exposed in `{ok:false, error:{code, message}}`.
    pub fn code(&self) -> &'static str {
        match self {
            CommonError::MissingCredentials { .. } => "missing_credentials",
            CommonError::InvalidFormat { .. } => "invalid_format",
            CommonError::InvalidCredentials { .. } => "invalid_credentials",
            CommonError::ClientSuspended { .. } => "client_suspended",
            CommonError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            CommonError::NotAuthorized { .. } => "not_authorized",
            CommonError::CycleDetected { .. } => "cycle_detected",
            CommonError::ValidationError { .. } => "validation_error",
            CommonError::DisallowedPattern { .. } => "disallowed_pattern",
            CommonError::ExceedsMaximumLength { .. } => "exceeds_maximum_length",
            CommonError::TypeMismatch { .. } => "type_mismatch",
            CommonError::MissingRequiredArgument { .. } => "missing_required_argument",
            CommonError::NotFound { .. } => "not_found",
            CommonError::Conflict { .. } => "conflict",
            CommonError::ReloadInProgress => "reload_in_progress",
            CommonError::Forbidden { .. } => "forbidden",
            CommonError::Unprocessable { .. } => "unprocessable",
            CommonError::PublishedMcpStructuralChange { .. } => "published_mcp_structural_change",
            CommonError::UpstreamTimeout { .. } => "upstream_timeout",
            CommonError::UpstreamDisconnected { .. } => "upstream_disconnected",
            CommonError::CapacityExceeded { .. } => "capacity_exceeded",
            CommonError::ShuttingDown => "shutting_down",
            CommonError::InvalidRequest { .. } => "invalid_request",
            CommonError::Internal { .. }
            | CommonError::Repository { .. }
            | CommonError::SqliteError { .. }
            | CommonError::TokioChannelError { .. }
            | CommonError::IoError { .. }
            | CommonError::UrlParseError { .. }
            | CommonError::SerdeSerializationError { .. }
            | CommonError::AxumError { .. }
            | CommonError::AddrParseError { .. }
            | CommonError::LibsqlMigrationError { .. }
            | CommonError::VarError { .. }
            | CommonError::GlobSetError { .. }
            | CommonError::ReqwestError { .. } => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            CommonError::MissingCredentials { .. }
            | CommonError::InvalidFormat { .. }
            | CommonError::InvalidCredentials { .. } => StatusCode::UNAUTHORIZED,
            CommonError::ClientSuspended { .. } | CommonError::Forbidden { .. } => {
                StatusCode::FORBIDDEN
            }
            CommonError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            CommonError::NotAuthorized { .. } => StatusCode::FORBIDDEN,
            CommonError::CycleDetected { .. }
            | CommonError::ValidationError { .. }
            | CommonError::DisallowedPattern { .. }
            | CommonError::ExceedsMaximumLength { .. }
            | CommonError::TypeMismatch { .. }
            | CommonError::MissingRequiredArgument { .. }
            | CommonError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            CommonError::NotFound { .. } => StatusCode::NOT_FOUND,
            CommonError::Conflict { .. } | CommonError::ReloadInProgress => StatusCode::CONFLICT,
            CommonError::Unprocessable { .. } | CommonError::PublishedMcpStructuralChange { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            CommonError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            CommonError::UpstreamDisconnected { .. } => StatusCode::BAD_GATEWAY,
            CommonError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CommonError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            CommonError::Internal { .. }
            | CommonError::Repository { .. }
            | CommonError::SqliteError { .. }
            | CommonError::TokioChannelError { .. }
            | CommonError::IoError { .. }
            | CommonError::UrlParseError { .. }
            | CommonError::SerdeSerializationError { .. }
            | CommonError::AxumError { .. }
            | CommonError::AddrParseError { .. }
            | CommonError::LibsqlMigrationError { .. }
            | CommonError::VarError { .. }
            | CommonError::GlobSetError { .. }
            | CommonError::ReqwestError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Extra machine-readable detail, never included for internal errors
    /// (those log full detail but expose only a generic message, per spec).
    fn details(&self) -> Option<Value> {
        match self {
            CommonError::RateLimitExceeded {
                retry_after_ms: Some(ms),
                ..
            } => Some(serde_json::json!({ "retry_after_ms": ms })),
            CommonError::NotAuthorized {
                policy_id: Some(id),
                ..
            } => Some(serde_json::json!({ "policy_id": id })),
            CommonError::PublishedMcpStructuralChange { field } => {
                Some(serde_json::json!({ "field": field }))
            }
            CommonError::UpstreamTimeout { mcp_name } | CommonError::UpstreamDisconnected { mcp_name } => {
                Some(serde_json::json!({ "mcp_name": mcp_name }))
            }
            _ => None,
        }
    }
}

impl ToSchema for CommonError {
    fn name() -> std::borrow::Cow<'static, str> {
        std::borrow::Cow::Borrowed("Error")
    }
}

impl PartialSchema for CommonError {
    fn schema() -> utoipa::openapi::RefOr<utoipa::openapi::schema::Schema> {
        utoipa::openapi::ObjectBuilder::new()
            .property(
                "code",
                utoipa::openapi::ObjectBuilder::new()
                    .schema_type(utoipa::openapi::schema::Type::String),
            )
            .required("code")
            .property(
                "message",
                utoipa::openapi::ObjectBuilder::new()
                    .schema_type(utoipa::openapi::schema::Type::String),
            )
            .required("message")
            .into()
    }
}

impl IntoResponses for CommonError {
    fn responses() -> std::collections::BTreeMap<
        String,
        utoipa::openapi::RefOr<utoipa::openapi::response::Response>,
    > {
        let mut responses = std::collections::BTreeMap::new();
        let error_content = utoipa::openapi::ContentBuilder::new()
            .schema(Some(CommonError::schema()))
            .build();

        for (status, description) in [
            ("400", "Invalid request"),
            ("401", "Authentication error"),
            ("403", "Authorization error"),
            ("404", "Resource not found"),
            ("409", "Conflict"),
            ("422", "Unprocessable"),
            ("429", "Rate limited"),
            ("500", "Server error"),
            ("503", "Capacity exceeded or shutting down"),
        ] {
            responses.insert(
                status.to_string(),
                utoipa::openapi::ResponseBuilder::new()
                    .description(description)
                    .content("application/json", error_content.clone())
                    .into(),
            );
        }

        responses
    }
}

/// The `{ok:false, error:{code, message, details?}}` envelope body (§6).
#[derive(Serialize)]
struct ErrorEnvelope {
    ok: bool,
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for CommonError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self, "internal error");
        }

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(ErrorEnvelope {
            ok: false,
            error: ErrorBody {
                code: self.code().to_string(),
                message,
                details: self.details(),
            },
        });

        (status, body).into_response()
    }
}
