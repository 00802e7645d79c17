//! Error taxonomy for the communication layer.
//!
//! Every failure that leaves the HTTP client is an [`ApiError`]: a
//! category, a severity and a retryability flag, plus whatever the backend
//! supplied (status, error code, details). Raw transport failures are
//! turned into `ApiError`s by [`classify`](crate::classify::classify) and
//! never cross the client boundary unwrapped.

use std::{fmt, time::{Duration, SystemTime}};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used by the HTTP side of the crate.
pub type ApiResult<T> = Result<T, ApiError>;

/// Closed set of error kinds produced by classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// No response: connection refused, DNS failure, timeout.
    Network,
    /// 4xx not covered by a more specific category.
    Client,
    /// 5xx.
    Server,
    /// 400 / 422.
    Validation,
    /// 401 / 403.
    Authentication,
    /// 404.
    NotFound,
    /// 409.
    Conflict,
    /// Anything without a transport envelope.
    Unknown,
}

impl ErrorCategory {
    /// All categories, in declaration order.
    pub const ALL: [ErrorCategory; 8] = [
        Self::Network,
        Self::Client,
        Self::Server,
        Self::Validation,
        Self::Authentication,
        Self::NotFound,
        Self::Conflict,
        Self::Unknown,
    ];

    /// Wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "NETWORK",
            Self::Client => "CLIENT",
            Self::Server => "SERVER",
            Self::Validation => "VALIDATION",
            Self::Authentication => "AUTHENTICATION",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Severity assigned when an error of this category is classified.
    pub fn default_severity(&self) -> ErrorSeverity {
        match self {
            Self::Network
            | Self::Authentication
            | Self::Conflict
            | Self::Client => ErrorSeverity::Warning,
            Self::Validation | Self::NotFound => ErrorSeverity::Info,
            Self::Server | Self::Unknown => ErrorSeverity::Error,
        }
    }

    /// Whether errors of this category are transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network | Self::Server)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How loudly an error should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    /// Wire name of the severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distinguishes self-inflicted failures from remote ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMarker {
    /// The per-request deadline elapsed before the transport settled.
    Timeout,
    /// The request was aborted through the client.
    Cancelled,
}

/// Error code attached to timeouts.
pub const TIMEOUT_CODE: &str = "TIMEOUT";
/// Error code attached to cancellations.
pub const CANCELLED_CODE: &str = "CANCELLED";

/// A classified, severity-tagged error.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{category} error: {message}")]
pub struct ApiError {
    /// Human-readable message (backend text when available).
    pub message: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    /// HTTP status of the failed response, if there was one.
    pub status_code: Option<u16>,
    /// Backend-supplied error code.
    pub error_code: Option<String>,
    /// Backend-supplied structured details.
    pub details: Option<serde_json::Value>,
    /// Whether the retry executor may re-attempt the call.
    pub retryable: bool,
    pub timestamp: SystemTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<ErrorMarker>,
}

impl ApiError {
    /// Create an error with the category's default severity and retryability.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category,
            severity: category.default_severity(),
            status_code: None,
            error_code: None,
            details: None,
            retryable: category.is_transient(),
            timestamp: SystemTime::now(),
            marker: None,
        }
    }

    /// A network failure (no response received).
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Network, message)
    }

    /// An error that could not be attributed to the transport.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unknown, message)
    }

    /// The request deadline elapsed.
    pub fn timeout(after: Duration) -> Self {
        let mut error = Self::network(format!("Request timed out after {}ms", after.as_millis()))
            .with_error_code(TIMEOUT_CODE);
        error.marker = Some(ErrorMarker::Timeout);
        error
    }

    /// The request was cancelled by the caller.
    pub fn cancelled(key: impl fmt::Display) -> Self {
        let mut error = Self::new(ErrorCategory::Unknown, format!("Request cancelled: {key}"))
            .with_severity(ErrorSeverity::Info)
            .with_error_code(CANCELLED_CODE)
            .with_retryable(false);
        error.marker = Some(ErrorMarker::Cancelled);
        error
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    #[must_use]
    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Whether this error came from the per-request deadline.
    pub fn is_timeout(&self) -> bool {
        self.marker == Some(ErrorMarker::Timeout)
    }

    /// Whether this error came from an explicit cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.marker == Some(ErrorMarker::Cancelled)
    }

    /// Generic, presentation-safe message for this error's category.
    pub fn user_message(&self) -> &'static str {
        UserMessages::DEFAULT.message_for(self.category)
    }

    /// Like [`user_message`](Self::user_message) but with a custom table.
    pub fn user_message_with<'a>(&self, messages: &'a UserMessages) -> &'a str {
        messages.message_for(self.category)
    }
}

/// Category → user-facing text table.
///
/// Presentation code swaps this table for a localized one instead of
/// branching on status codes.
#[derive(Debug, Clone)]
pub struct UserMessages {
    pub network: &'static str,
    pub client: &'static str,
    pub server: &'static str,
    pub validation: &'static str,
    pub authentication: &'static str,
    pub not_found: &'static str,
    pub conflict: &'static str,
    pub unknown: &'static str,
}

impl UserMessages {
    pub const DEFAULT: UserMessages = UserMessages {
        network: "Unable to reach the server. Please check your connection and try again.",
        client: "The request could not be processed.",
        server: "The server encountered a problem. Please try again later.",
        validation: "Some of the submitted data is invalid. Please review and try again.",
        authentication: "Your session has expired or you do not have access. Please sign in again.",
        not_found: "The requested resource was not found.",
        conflict: "This change conflicts with the current state. Please refresh and try again.",
        unknown: "An unexpected error occurred.",
    };

    /// Text shown for a category.
    pub fn message_for(&self, category: ErrorCategory) -> &'static str {
        match category {
            ErrorCategory::Network => self.network,
            ErrorCategory::Client => self.client,
            ErrorCategory::Server => self.server,
            ErrorCategory::Validation => self.validation,
            ErrorCategory::Authentication => self.authentication,
            ErrorCategory::NotFound => self.not_found,
            ErrorCategory::Conflict => self.conflict,
            ErrorCategory::Unknown => self.unknown,
        }
    }
}

impl Default for UserMessages {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Invalid configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Missing environment variable {name}")]
    MissingEnv { name: &'static str },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn invalid_url(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ApiError::network("connection refused");
        assert_eq!(err.category, ErrorCategory::Network);
        assert_eq!(err.severity, ErrorSeverity::Warning);
        assert!(err.retryable);

        let err = ApiError::unknown("boom");
        assert_eq!(err.severity, ErrorSeverity::Error);
        assert!(!err.retryable);
    }

    #[test]
    fn test_timeout_and_cancel_markers() {
        let timeout = ApiError::timeout(Duration::from_millis(250));
        assert!(timeout.is_timeout());
        assert!(!timeout.is_cancelled());
        assert_eq!(timeout.category, ErrorCategory::Network);
        assert_eq!(timeout.error_code.as_deref(), Some(TIMEOUT_CODE));
        assert!(timeout.retryable);

        let cancelled = ApiError::cancelled("GET:/stats");
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.retryable);
        assert_eq!(cancelled.severity, ErrorSeverity::Info);
        assert!(cancelled.message.contains("GET:/stats"));
    }

    #[test]
    fn test_user_message_is_decoupled_from_backend_text() {
        let err = ApiError::new(ErrorCategory::NotFound, "row 42 missing in table x")
            .with_status(404);
        assert_eq!(err.user_message(), UserMessages::DEFAULT.not_found);
        assert!(!err.user_message().contains("42"));

        let custom = UserMessages {
            not_found: "Introuvable",
            ..UserMessages::DEFAULT
        };
        assert_eq!(err.user_message_with(&custom), "Introuvable");
    }

    #[test]
    fn test_every_category_has_a_message() {
        for category in ErrorCategory::ALL {
            assert!(!UserMessages::DEFAULT.message_for(category).is_empty());
        }
    }

    #[test]
    fn test_api_error_serde_keeps_marker() {
        let err = ApiError::timeout(Duration::from_secs(1)).with_status(504);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"NETWORK\""));
        let back: ApiError = serde_json::from_str(&json).unwrap();
        assert!(back.is_timeout());
        assert_eq!(back.status_code, Some(504));
    }
}
