//! Standardized API error envelope.
//!
//! Every error the surface returns has the same shape:
//!
//! ```json
//! {
//!   "error": "NOT_FOUND",
//!   "message": "Signal not found",
//!   "error_code": "ERR_404_001",
//!   "details": [],
//!   "hint": "Check the signal_id",
//!   "documentation_url": "https://docs.omen.example/errors#not-found",
//!   "timestamp": "...",
//!   "request_id": "..."
//! }
//! ```
//!
//! Raw underlying errors never reach clients in production; development
//! may carry source chains in `details`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;

const DOCS_BASE: &str = "https://docs.omen.example/errors";

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: u16,
    pub error: String,
    pub message: String,
    pub error_code: String,
    pub details: Vec<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub documentation_url: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApiError {
    fn new(
        status: u16,
        error: &str,
        message: impl Into<String>,
        error_code: &str,
        doc_slug: &str,
    ) -> Self {
        Self {
            status,
            error: error.to_string(),
            message: message.into(),
            error_code: error_code.to_string(),
            details: Vec::new(),
            hint: None,
            documentation_url: format!("{}#{}", DOCS_BASE, doc_slug),
            timestamp: Utc::now().to_rfc3339(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_detail(mut self, field: Option<&str>, message: impl Into<String>) -> Self {
        self.details.push(ErrorDetail {
            field: field.map(String::from),
            message: message.into(),
            code: None,
        });
        self
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(404, "NOT_FOUND", format!("{} not found", what), "ERR_404_001", "not-found")
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(
            422,
            "VALIDATION_ERROR",
            message,
            "ERR_422_001",
            "validation-error",
        )
    }

    pub fn authentication_required(request_id: Option<String>) -> Self {
        Self::new(
            401,
            "AUTHENTICATION_REQUIRED",
            "An API key is required for this endpoint",
            "ERR_401_001",
            "authentication",
        )
        .with_hint("Send your key in the X-API-Key header")
        .with_request_id(request_id)
    }

    pub fn invalid_api_key(request_id: Option<String>) -> Self {
        Self::new(
            401,
            "INVALID_API_KEY",
            "The provided API key is not valid",
            "ERR_401_002",
            "authentication",
        )
        .with_request_id(request_id)
    }

    pub fn insufficient_permissions(required_scopes: &[&str], missing_scopes: &[&str]) -> Self {
        let mut error = Self::new(
            403,
            "INSUFFICIENT_PERMISSIONS",
            "Your API key lacks the required scopes",
            "ERR_403_001",
            "permissions",
        );
        error = error.with_detail(
            Some("required_scopes"),
            required_scopes.join(", "),
        );
        error.with_detail(Some("missing_scopes"), missing_scopes.join(", "))
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::new(
            429,
            "RATE_LIMIT_EXCEEDED",
            "Too many requests",
            "ERR_429_001",
            "rate-limits",
        )
        .with_hint(format!("Retry after {}s", retry_after_secs))
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            503,
            "SERVICE_UNAVAILABLE",
            message,
            "ERR_503_001",
            "availability",
        )
    }

    /// Internal error. The underlying cause is only surfaced in
    /// development builds.
    pub fn internal(cause: &str, is_production: bool) -> Self {
        let mut error = Self::new(
            500,
            "INTERNAL_ERROR",
            "An internal error occurred",
            "ERR_500_001",
            "internal",
        );
        if !is_production {
            error = error.with_detail(Some("cause"), cause);
        }
        error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_has_required_fields() {
        let error = ApiError::not_found("Signal").with_request_id(Some("req-1".to_string()));
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["error"], "NOT_FOUND");
        assert_eq!(json["error_code"], "ERR_404_001");
        assert_eq!(json["request_id"], "req-1");
        assert!(json["documentation_url"].as_str().unwrap().contains("#not-found"));
        assert!(json.get("status").is_none(), "status is transport-level only");
    }

    #[test]
    fn internal_hides_cause_in_production() {
        let production = ApiError::internal("db exploded", true);
        assert!(production.details.is_empty());
        let development = ApiError::internal("db exploded", false);
        assert_eq!(development.details.len(), 1);
        assert!(development.details[0].message.contains("db exploded"));
    }

    #[test]
    fn permission_error_names_scopes() {
        let error = ApiError::insufficient_permissions(&["signals:read"], &["signals:read"]);
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["error"], "INSUFFICIENT_PERMISSIONS");
        assert_eq!(json["details"][0]["field"], "required_scopes");
    }
}
