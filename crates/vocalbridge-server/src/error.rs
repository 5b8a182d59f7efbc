//! The uniform error envelope
//!
//! Every failure leaves the server as
//! `{"error": {"code", "message", "details?", "correlationId"}}` with the
//! matching HTTP status. Internal errors are sanitized; the original cause
//! goes to the log, keyed by the correlation id.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use vocalbridge_core::{Error, ErrorCode};

/// A core error paired with the request's correlation id.
#[derive(Debug)]
pub struct ApiError {
    pub error: Error,
    pub correlation_id: String,
}

impl ApiError {
    pub fn new(error: Error, correlation_id: impl Into<String>) -> Self {
        Self {
            error,
            correlation_id: correlation_id.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error.code();
        let status =
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Sanitize: internals never leak stack traces or raw payloads.
        let message = match code {
            ErrorCode::InternalError => {
                error!(
                    correlation_id = %self.correlation_id,
                    error = %self.error,
                    "Internal error"
                );
                "An internal error occurred".to_string()
            }
            ErrorCode::ProviderSchemaError => {
                error!(
                    correlation_id = %self.correlation_id,
                    error = %self.error,
                    "Provider schema error"
                );
                "The upstream provider returned an unusable response".to_string()
            }
            _ => self.error.to_string(),
        };

        let mut body = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": message,
                "correlationId": self.correlation_id,
            }
        });
        // A lock conflict explicitly invites a retry.
        if code == ErrorCode::Conflict {
            body["error"]["details"] = serde_json::json!({"retryable": true});
        }
        if let Error::RateLimited {
            retry_after_ms: Some(ms),
        } = &self.error
        {
            body["error"]["details"] = serde_json::json!({"retryAfterMs": ms});
        }

        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = self.correlation_id.parse() {
            response.headers_mut().insert("x-correlation-id", value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let response =
            ApiError::new(Error::NotFound("session".into()), "corr-1").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("x-correlation-id").unwrap(),
            "corr-1"
        );

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert_eq!(body["error"]["correlationId"], "corr-1");
        assert!(body["error"]["message"].as_str().unwrap().contains("session"));
    }

    #[tokio::test]
    async fn test_internal_error_is_sanitized() {
        let response = ApiError::new(
            Error::Database("connection refused to 10.0.0.5:5432".into()),
            "corr-2",
        )
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        let message = body["error"]["message"].as_str().unwrap();
        assert!(!message.contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_conflict_advertises_retry() {
        let response =
            ApiError::new(Error::Conflict("session busy".into()), "corr-3").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"]["details"]["retryable"], true);
    }

    #[tokio::test]
    async fn test_provider_error_maps_to_502() {
        let response = ApiError::new(
            Error::provider(
                vocalbridge_core::types::ProviderId::VendorA,
                "upstream 500",
                Some(500),
            ),
            "corr-4",
        )
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
