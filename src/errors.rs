//! Error taxonomy for the load generator core.
//!
//! Two layers live here: [`ErrorCategory`], the bounded taxonomy a Worker uses
//! to tag transport-level failures before they land in a run's `errors` map,
//! and [`CoreError`], the typed error surface the Service façade and its
//! collaborators return.

use std::fmt;
use thiserror::Error;

/// Categories of errors that can occur during load testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP 4xx errors (client errors)
    ClientError,

    /// HTTP 5xx errors (server errors)
    ServerError,

    /// Network connectivity errors (DNS, connection refused, etc.)
    NetworkError,

    /// Request timeout errors
    TimeoutError,

    /// TLS/SSL certificate errors
    TlsError,

    /// Other/unknown errors
    OtherError,
}

impl ErrorCategory {
    /// Categorize an HTTP status code.
    ///
    /// Returns `None` for success responses (2xx/3xx) — those have no entry
    /// in the `errors` map, only in `status_codes`.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            200..=399 => None,
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Categorize a reqwest error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            ErrorCategory::TimeoutError
        } else if error.is_connect() {
            ErrorCategory::NetworkError
        } else if error.is_request() {
            ErrorCategory::NetworkError
        } else if error.is_body() || error.is_decode() {
            ErrorCategory::NetworkError
        } else if error.is_redirect() {
            ErrorCategory::ClientError
        } else {
            let error_msg = error.to_string().to_lowercase();

            if error_msg.contains("certificate")
                || error_msg.contains("tls")
                || error_msg.contains("ssl")
            {
                ErrorCategory::TlsError
            } else if error_msg.contains("timeout") {
                ErrorCategory::TimeoutError
            } else if error_msg.contains("dns")
                || error_msg.contains("resolve")
                || error_msg.contains("connect")
                || error_msg.contains("connection")
            {
                ErrorCategory::NetworkError
            } else {
                ErrorCategory::OtherError
            }
        }
    }

    /// Short, stable tag used as an `errors` map key.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }

    /// Human-readable description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "HTTP 4xx Client Errors",
            ErrorCategory::ServerError => "HTTP 5xx Server Errors",
            ErrorCategory::NetworkError => "Network/Connection Errors",
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::TlsError => "TLS/SSL Certificate Errors",
            ErrorCategory::OtherError => "Other/Unknown Errors",
        }
    }

    /// All categories in a consistent order.
    pub fn all() -> Vec<ErrorCategory> {
        vec![
            ErrorCategory::ClientError,
            ErrorCategory::ServerError,
            ErrorCategory::NetworkError,
            ErrorCategory::TimeoutError,
            ErrorCategory::TlsError,
            ErrorCategory::OtherError,
        ]
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A single field-level validation failure on a `TestPlan` draft.
#[derive(Debug, Clone, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error surface returned by the Service façade and its collaborators.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid test plan: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("run '{run_id}' is already running")]
    AlreadyRunning { run_id: String },

    #[error("run '{run_id}' violated its SLA: {reason}")]
    SLAViolation { run_id: String, reason: String },

    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn already_running(run_id: impl Into<String>) -> Self {
        CoreError::AlreadyRunning {
            run_id: run_id.into(),
        }
    }
}
