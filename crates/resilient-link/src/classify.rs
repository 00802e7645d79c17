//! Turns raw transport failures into [`ApiError`]s.

use serde_json::Value;

use crate::{
    error::{ApiError, ErrorCategory, ErrorMarker, TIMEOUT_CODE},
    transport::{NetworkFailureKind, TransportFailure},
};

/// Map a status code to its category.
pub fn category_for_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Authentication,
        404 => ErrorCategory::NotFound,
        400 | 422 => ErrorCategory::Validation,
        409 => ErrorCategory::Conflict,
        500..=599 => ErrorCategory::Server,
        400..=499 => ErrorCategory::Client,
        _ => ErrorCategory::Unknown,
    }
}

/// Classify a transport failure. Pure: no logging, no I/O.
pub fn classify(failure: &TransportFailure) -> ApiError {
    match failure {
        TransportFailure::Network { kind, message } => {
            let mut error = ApiError::network(if message.is_empty() {
                format!("Network error: {kind}")
            } else {
                message.clone()
            })
            .with_retryable(true);
            if *kind == NetworkFailureKind::Timeout {
                error = error.with_error_code(TIMEOUT_CODE);
                error.marker = Some(ErrorMarker::Timeout);
            }
            error
        }
        TransportFailure::Status { status, body, .. } => {
            let category = category_for_status(*status);
            let backend = BackendError::parse(body);
            let message = backend
                .message
                .unwrap_or_else(|| generic_message(*status, category));

            let mut error = ApiError::new(category, message)
                .with_status(*status)
                .with_retryable(category == ErrorCategory::Server);
            if let Some(code) = backend.code {
                error = error.with_error_code(code);
            }
            if let Some(details) = backend.details {
                error = error.with_details(details);
            }
            error
        }
        TransportFailure::Other { message } => ApiError::unknown(if message.is_empty() {
            "An unexpected error occurred".to_string()
        } else {
            message.clone()
        }),
    }
}

impl From<TransportFailure> for ApiError {
    fn from(failure: TransportFailure) -> Self {
        classify(&failure)
    }
}

/// Classify any error without a transport envelope.
pub fn classify_other(error: impl std::fmt::Display) -> ApiError {
    classify(&TransportFailure::other(error.to_string()))
}

fn generic_message(status: u16, category: ErrorCategory) -> String {
    let reason = http::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason());
    match reason {
        Some(reason) => format!("Request failed with status {status} ({reason})"),
        None => format!("Request failed with status {status} ({category})"),
    }
}

/// Fields a backend may put in a JSON error body.
#[derive(Debug, Default)]
struct BackendError {
    message: Option<String>,
    code: Option<String>,
    details: Option<Value>,
}

impl BackendError {
    fn parse(body: &[u8]) -> Self {
        let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };

        let text = |keys: &[&str]| {
            keys.iter().find_map(|key| match map.get(*key) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
        };

        let message = text(&["message", "detail", "error"]);
        let code = text(&["error_code", "errorCode", "code"]);
        let details = map
            .get("details")
            .filter(|value| !value.is_null())
            .cloned();

        Self {
            message,
            code,
            details,
        }
    }
}
