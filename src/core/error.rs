//! Error type system for Kagura
//!
//! This module provides the typed error taxonomy handed to callers of the
//! extension runtime:
//! - Load, timeout, runtime and contract failures with the extension id and
//!   operation attached for diagnostics
//! - HTTP status code mapping for the command surface
//! - Serializable error responses with trace IDs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::api::middleware::trace::current_trace_id;

/// Main error type for the Kagura extension runtime
#[derive(Debug, thiserror::Error)]
pub enum KaguraError {
    /// Script failed to parse, or is missing required exports
    #[error("Extension load failed{}: {message}", fmt_id(.extension_id))]
    ExtensionLoad {
        extension_id: Option<String>,
        message: String,
    },

    #[error("Extension {extension_id} timed out in {operation} after {timeout_ms}ms")]
    ExtensionTimeout {
        extension_id: String,
        operation: String,
        timeout_ms: u64,
    },

    /// Uncaught exception inside the plugin, carrying the original message
    #[error("Extension {extension_id} failed in {operation}: {message}")]
    ExtensionRuntime {
        extension_id: String,
        operation: String,
        message: String,
    },

    /// A fetch failure the plugin did not catch
    #[error("Extension {extension_id} network bridge failure in {operation}: {message}")]
    NetworkBridge {
        extension_id: String,
        operation: String,
        message: String,
    },

    #[error("Extension {extension_id} ({kind}) does not support {operation}")]
    UnsupportedOperation {
        extension_id: String,
        operation: String,
        kind: String,
    },

    #[error("Extension {extension_id} violated the {operation} contract: {message}")]
    ContractViolation {
        extension_id: String,
        operation: String,
        message: String,
    },

    #[error("Extension not found: {0}")]
    ExtensionNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

fn fmt_id(id: &Option<String>) -> String {
    id.as_ref().map(|id| format!(" ({})", id)).unwrap_or_default()
}

impl KaguraError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            KaguraError::InvalidRequest(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            KaguraError::ExtensionNotFound(_) => StatusCode::NOT_FOUND,

            // 422 Unprocessable Entity
            KaguraError::ExtensionLoad { .. } | KaguraError::UnsupportedOperation { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            // 502 Bad Gateway: the provider side misbehaved
            KaguraError::ExtensionRuntime { .. }
            | KaguraError::NetworkBridge { .. }
            | KaguraError::ContractViolation { .. } => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            KaguraError::ExtensionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            // 500 Internal Server Error
            KaguraError::ConfigError(_) | KaguraError::IoError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error type name for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            KaguraError::ExtensionLoad { .. } => "ExtensionLoadError",
            KaguraError::ExtensionTimeout { .. } => "ExtensionTimeoutError",
            KaguraError::ExtensionRuntime { .. } => "ExtensionRuntimeError",
            KaguraError::NetworkBridge { .. } => "NetworkBridgeError",
            KaguraError::UnsupportedOperation { .. } => "UnsupportedOperationError",
            KaguraError::ContractViolation { .. } => "ContractViolationError",
            KaguraError::ExtensionNotFound(_) => "ExtensionNotFound",
            KaguraError::InvalidRequest(_) => "InvalidRequest",
            KaguraError::ConfigError(_) => "ConfigError",
            KaguraError::IoError(_) => "IoError",
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KaguraError::ExtensionTimeout { .. }
                | KaguraError::ExtensionRuntime { .. }
                | KaguraError::NetworkBridge { .. }
                | KaguraError::ContractViolation { .. }
        )
    }

    /// Extension the error refers to, if any
    fn extension_id(&self) -> Option<&str> {
        match self {
            KaguraError::ExtensionLoad { extension_id, .. } => extension_id.as_deref(),
            KaguraError::ExtensionTimeout { extension_id, .. }
            | KaguraError::ExtensionRuntime { extension_id, .. }
            | KaguraError::NetworkBridge { extension_id, .. }
            | KaguraError::UnsupportedOperation { extension_id, .. }
            | KaguraError::ContractViolation { extension_id, .. } => Some(extension_id),
            KaguraError::ExtensionNotFound(id) => Some(id),
            _ => None,
        }
    }

    /// Operation the error occurred in, if any
    fn operation(&self) -> Option<&str> {
        match self {
            KaguraError::ExtensionTimeout { operation, .. }
            | KaguraError::ExtensionRuntime { operation, .. }
            | KaguraError::NetworkBridge { operation, .. }
            | KaguraError::UnsupportedOperation { operation, .. }
            | KaguraError::ContractViolation { operation, .. } => Some(operation),
            _ => None,
        }
    }
}

/// Error response structure handed to the presentation layer
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Whether the caller may render this as a retryable failure
    pub retryable: bool,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Unique trace ID for this error
    pub trace_id: String,
}

impl ErrorResponse {
    /// Create an error response from a KaguraError with a generated trace ID
    pub fn from_error(error: &KaguraError) -> Self {
        Self::from_error_with_trace_id(error, Uuid::new_v4().to_string())
    }

    /// Create an error response from a KaguraError with a specific trace ID
    pub fn from_error_with_trace_id(error: &KaguraError, trace_id: String) -> Self {
        let details = match (error.extension_id(), error.operation()) {
            (None, None) => None,
            (extension_id, operation) => Some(serde_json::json!({
                "extensionId": extension_id,
                "operation": operation,
            })),
        };

        Self {
            error: error.error_type().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            details,
            trace_id,
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (trace_id: {})",
            self.error, self.message, self.trace_id
        )
    }
}

/// Implement IntoResponse for KaguraError to enable automatic error handling in Axum
impl IntoResponse for KaguraError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        // reuse the command's trace ID so the body matches the X-Trace-Id header
        let error_response = match current_trace_id() {
            Some(trace_id) => ErrorResponse::from_error_with_trace_id(&self, trace_id),
            None => ErrorResponse::from_error(&self),
        };

        tracing::error!(
            error_type = self.error_type(),
            trace_id = %error_response.trace_id,
            status_code = %status_code,
            "Request failed: {}",
            self
        );

        (status_code, Json(error_response)).into_response()
    }
}

/// Result type alias for operations that can fail with KaguraError
pub type Result<T> = std::result::Result<T, KaguraError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout() -> KaguraError {
        KaguraError::ExtensionTimeout {
            extension_id: "ext-1".into(),
            operation: "search".into(),
            timeout_ms: 500,
        }
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            KaguraError::InvalidRequest("test".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            KaguraError::ExtensionNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(timeout().status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            KaguraError::UnsupportedOperation {
                extension_id: "x".into(),
                operation: "resolveSources".into(),
                kind: "manga".into(),
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_error_types() {
        assert_eq!(timeout().error_type(), "ExtensionTimeoutError");
        assert_eq!(
            KaguraError::ContractViolation {
                extension_id: "x".into(),
                operation: "search".into(),
                message: "results is not an array".into(),
            }
            .error_type(),
            "ContractViolationError"
        );
        assert_eq!(
            KaguraError::ExtensionLoad {
                extension_id: None,
                message: "syntax".into()
            }
            .error_type(),
            "ExtensionLoadError"
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(timeout().is_retryable());
        assert!(!KaguraError::InvalidRequest("test".into()).is_retryable());
        assert!(!KaguraError::ExtensionNotFound("x".into()).is_retryable());
    }

    #[test]
    fn test_load_error_message_includes_id_when_known() {
        let err = KaguraError::ExtensionLoad {
            extension_id: Some("abc".into()),
            message: "missing search".into(),
        };
        assert_eq!(err.to_string(), "Extension load failed (abc): missing search");

        let err = KaguraError::ExtensionLoad {
            extension_id: None,
            message: "missing search".into(),
        };
        assert_eq!(err.to_string(), "Extension load failed: missing search");
    }

    #[test]
    fn test_error_response_carries_diagnostics() {
        let response = ErrorResponse::from_error(&timeout());

        assert_eq!(response.error, "ExtensionTimeoutError");
        assert!(response.retryable);
        assert!(!response.trace_id.is_empty());
        let details = response.details.unwrap();
        assert_eq!(details["extensionId"], "ext-1");
        assert_eq!(details["operation"], "search");
    }

    #[test]
    fn test_error_response_with_trace_id() {
        let error = KaguraError::InvalidRequest("page must be >= 1".into());
        let response = ErrorResponse::from_error_with_trace_id(&error, "trace-123".into());

        assert_eq!(response.trace_id, "trace-123");
        assert!(response.details.is_none());
        assert!(!response.retryable);
    }
}
