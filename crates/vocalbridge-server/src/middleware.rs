//! Correlation-id middleware
//!
//! An incoming `X-Correlation-Id` is respected, otherwise one is generated.
//! The id rides in request extensions for handlers, is echoed on every
//! response, and appears in every log line and persisted provider-call row.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Extension carrying the request's correlation id.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

pub async fn correlation_middleware(mut req: Request, next: Next) -> Response {
    let correlation_id = req
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    let mut response = next.run(req).await;
    if !response.headers().contains_key(CORRELATION_HEADER)
        && let Ok(value) = correlation_id.parse()
    {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request as HttpRequest, middleware, routing::get};
    use tower::ServiceExt;

    async fn echo(axum::Extension(id): axum::Extension<CorrelationId>) -> String {
        id.0
    }

    fn app() -> Router {
        Router::new()
            .route("/test", get(echo))
            .layer(middleware::from_fn(correlation_middleware))
    }

    #[tokio::test]
    async fn test_incoming_id_is_respected() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/test")
                    .header("x-correlation-id", "corr-from-client")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(CORRELATION_HEADER).unwrap(),
            "corr-from-client"
        );
    }

    #[tokio::test]
    async fn test_missing_id_is_generated_and_echoed() {
        let response = app()
            .oneshot(
                HttpRequest::builder()
                    .uri("/test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let echoed = response.headers().get(CORRELATION_HEADER).unwrap();
        assert!(!echoed.to_str().unwrap().is_empty());
    }
}
