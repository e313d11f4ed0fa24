//! Error taxonomy for the script-execution subsystem (§7).
//!
//! Every error that can reach the request delegate boundary has a fixed
//! HTTP status and a machine-readable kind, so [`crate::error_writer`] can
//! render a response without re-deriving policy from a generic error type.

use axum::http::StatusCode;
use thiserror::Error;

/// Top-level error taxonomy, organized by source component as in spec §7.
#[derive(Debug, Error)]
pub enum ScriptHostError {
    #[error("missing Content-Type header; expected one of: {allowed}")]
    MissingContentType { allowed: String },

    #[error("malformed Content-Type header: {raw}")]
    MalformedContentType { raw: String },

    #[error("unsupported Content-Type '{raw}'; expected one of: {allowed}")]
    UnsupportedContentType { raw: String, allowed: String },

    #[error("failed to bind parameter '{name}': {reason}")]
    ParameterBindingFailure { name: String, reason: String },

    #[error("failed to parse form body: {reason}")]
    FormParsingFailure { reason: String, status: u16 },

    #[error("failed to resolve parameter '{name}': {reason}")]
    ParameterResolutionFailure {
        name: String,
        reason: String,
        status: u16,
    },

    #[error("script diagnostics reported errors at registration:\n{diagnostics}")]
    ScriptDiagnosticsFailure { diagnostics: String },

    #[error("script runtime failure: {message}")]
    ScriptRuntimeFailure { message: String },

    #[error("postponed write failed with code {code}")]
    PostponedWriteError { code: i32 },

    /// The request's cancellation token fired. Never rendered: the
    /// delegate swallows this at the boundary (§4.6, §8 scenario 6).
    #[error("request cancelled")]
    RequestCancelled,
}

impl ScriptHostError {
    /// HTTP status this error renders as by default (§7). `RequestCancelled`
    /// has no status: it must never reach the response writer.
    pub fn status(&self) -> StatusCode {
        match self {
            ScriptHostError::MissingContentType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ScriptHostError::MalformedContentType { .. } => StatusCode::BAD_REQUEST,
            ScriptHostError::UnsupportedContentType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ScriptHostError::ParameterBindingFailure { .. } => StatusCode::BAD_REQUEST,
            ScriptHostError::FormParsingFailure { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            ScriptHostError::ParameterResolutionFailure { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            ScriptHostError::ScriptDiagnosticsFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ScriptHostError::ScriptRuntimeFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ScriptHostError::PostponedWriteError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ScriptHostError::RequestCancelled => StatusCode::OK,
        }
    }

    /// Machine-readable error code used in the default JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            ScriptHostError::MissingContentType { .. } => "missing_content_type",
            ScriptHostError::MalformedContentType { .. } => "malformed_content_type",
            ScriptHostError::UnsupportedContentType { .. } => "unsupported_content_type",
            ScriptHostError::ParameterBindingFailure { .. } => "parameter_binding_failure",
            ScriptHostError::FormParsingFailure { .. } => "form_parsing_failure",
            ScriptHostError::ParameterResolutionFailure { .. } => "parameter_resolution_failure",
            ScriptHostError::ScriptDiagnosticsFailure { .. } => "script_diagnostics_failure",
            ScriptHostError::ScriptRuntimeFailure { .. } => "script_runtime_failure",
            ScriptHostError::PostponedWriteError { .. } => "postponed_write_error",
            ScriptHostError::RequestCancelled => "request_cancelled",
        }
    }
}

/// Decode-layer error (C2). Never panics a decoder; returned so C3 can turn
/// it into a [`ScriptHostError::ParameterBindingFailure`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {media_type} body: {reason}")]
    Malformed { media_type: String, reason: String },

    #[error("no decoder registered for media type '{0}'")]
    Unregistered(String),
}
