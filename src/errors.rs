//! Error categorization for per-request outcomes.
//!
//! Transport failures and non-2xx statuses are classified into a small set of
//! categories. They never stop a run; the category only labels the
//! errors-by-category metric and debug logs.

use std::fmt;
use thiserror::Error;

/// Categories of errors that can occur while driving the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP 4xx errors (client errors)
    ClientError,

    /// HTTP 5xx errors (server errors)
    ServerError,

    /// Network connectivity errors (DNS, connection refused, reset)
    NetworkError,

    /// Request exceeded the per-request deadline
    TimeoutError,

    /// TLS/SSL certificate or handshake errors
    TlsError,

    /// Other/unknown errors, including request construction failures
    OtherError,
}

impl ErrorCategory {
    /// Categorize an HTTP status code.
    ///
    /// Returns `None` for 2xx and 3xx.
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
            return ErrorCategory::TimeoutError;
        }
        if error.is_builder() {
            return ErrorCategory::OtherError;
        }

        // reqwest folds TLS failures into connect errors, so look at the
        // message before the coarser flags.
        let error_msg = format!("{:?}", error).to_lowercase();
        if error_msg.contains("certificate") || error_msg.contains("tls") {
            ErrorCategory::TlsError
        } else if error.is_connect() || error.is_request() || error.is_body() {
            ErrorCategory::NetworkError
        } else if error.is_redirect() {
            ErrorCategory::ClientError
        } else if error_msg.contains("timed out") {
            ErrorCategory::TimeoutError
        } else if error_msg.contains("dns") || error_msg.contains("connection") {
            ErrorCategory::NetworkError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Get the Prometheus label for this error category.
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

    /// Get a human-readable description of this error category.
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

    /// Get all error categories in a consistent order.
    pub fn all() -> [ErrorCategory; 6] {
        [
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

/// A request that produced no HTTP response.
#[derive(Debug, Clone, Error)]
#[error("[{}] {message}", category.label())]
pub struct TransportError {
    pub category: ErrorCategory,
    pub message: String,
}

impl TransportError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        Self {
            category: ErrorCategory::from_reqwest_error(&error),
            message: error.to_string(),
        }
    }
}
