//! Application error type mapping webhook failures to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use taskgate_core::webhook::WebhookError;
use taskgate_types::error::RepositoryError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Webhook(WebhookError),
}

impl From<WebhookError> for AppError {
    fn from(e: WebhookError) -> Self {
        AppError::Webhook(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Webhook(e) => match e {
                WebhookError::BadPath(_) => (StatusCode::BAD_REQUEST, "BAD_PATH", e.to_string()),
                WebhookError::InvalidJson(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_JSON", e.to_string())
                }
                WebhookError::Filter(_) => (StatusCode::BAD_REQUEST, "FILTER_ERROR", e.to_string()),
                WebhookError::Render(_) => {
                    (StatusCode::BAD_REQUEST, "TEMPLATE_ERROR", e.to_string())
                }
                WebhookError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "TRIGGER_NOT_FOUND", e.to_string())
                }
                // Details stay in the server log.
                WebhookError::Unauthorized(_) => (
                    StatusCode::UNAUTHORIZED,
                    "UNAUTHORIZED",
                    "webhook authentication failed".to_string(),
                ),
                WebhookError::Store(RepositoryError::Unavailable(_)) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_UNAVAILABLE",
                    e.to_string(),
                ),
                WebhookError::Store(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", e.to_string())
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), code, error = %message, "webhook request failed");
        }
        let body = json!({
            "status": "error",
            "error": {
                "code": code,
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use taskgate_core::webhook::AuthError;
    use taskgate_types::meta::ObjectKey;

    use super::*;

    fn status_of(e: WebhookError) -> StatusCode {
        AppError::from(e).into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(WebhookError::BadPath("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(WebhookError::InvalidJson("eof".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(WebhookError::NotFound(ObjectKey::new("default", "gh"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(WebhookError::Unauthorized(AuthError::Mismatch)),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(WebhookError::Store(RepositoryError::Unavailable("down".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(WebhookError::Store(RepositoryError::Invalid("bad".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unauthorized_hides_details() {
        let (_, _, message) = AppError::from(WebhookError::Unauthorized(AuthError::MissingHeader(
            "X-Hub-Signature-256".into(),
        )))
        .parts();
        assert_eq!(message, "webhook authentication failed");
    }
}
