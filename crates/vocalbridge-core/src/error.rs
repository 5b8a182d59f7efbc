//! Error types shared across the gateway

use serde::Serialize;
use thiserror::Error;

use crate::types::ProviderId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Payment required: {0}")]
    PaymentRequired(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded{}", retry_after_ms.map(|ms| format!(": retry after {}ms", ms)).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Provider error: {message}")]
    Provider {
        provider: Option<ProviderId>,
        message: String,
        status: Option<u16>,
        retryable: bool,
    },

    /// The vendor responded with a payload that failed schema validation.
    /// Carries the raw payload for diagnosis; never retried.
    #[error("Provider returned a malformed response: {message}")]
    ProviderSchema {
        provider: Option<ProviderId>,
        message: String,
        raw: serde_json::Value,
    },

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn provider(provider: ProviderId, message: impl Into<String>, status: Option<u16>) -> Self {
        Error::Provider {
            provider: Some(provider),
            message: message.into(),
            status,
            retryable: status.is_none_or(|s| s >= 500),
        }
    }

    /// Whether the orchestrator may retry the attempt that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::RateLimited { .. } => true,
            Error::Provider {
                status, retryable, ..
            } => *retryable || status.is_some_and(|s| s >= 500),
            _ => false,
        }
    }

    /// The stable machine-readable code used in the HTTP error envelope and
    /// in persisted provider-call rows.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Validation(_) => ErrorCode::ValidationError,
            Error::Unauthorized(_) => ErrorCode::Unauthorized,
            Error::PaymentRequired(_) => ErrorCode::PaymentRequired,
            Error::Forbidden(_) => ErrorCode::Forbidden,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Conflict(_) => ErrorCode::Conflict,
            Error::RateLimited { .. } => ErrorCode::RateLimited,
            Error::Provider { .. } => ErrorCode::ProviderError,
            Error::ProviderSchema { .. } => ErrorCode::ProviderSchemaError,
            Error::Timeout(_) => ErrorCode::TimeoutError,
            Error::Database(_) | Error::Serialization(_) | Error::Internal(_) => {
                ErrorCode::InternalError
            }
        }
    }
}

/// Stable error codes exposed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    Unauthorized,
    PaymentRequired,
    Forbidden,
    NotFound,
    Conflict,
    RateLimited,
    InternalError,
    ProviderError,
    ProviderSchemaError,
    TimeoutError,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::PaymentRequired => 402,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict => 409,
            ErrorCode::RateLimited => 429,
            ErrorCode::InternalError => 500,
            ErrorCode::ProviderError | ErrorCode::ProviderSchemaError => 502,
            ErrorCode::TimeoutError => 504,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::PaymentRequired => "PAYMENT_REQUIRED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ProviderError => "PROVIDER_ERROR",
            ErrorCode::ProviderSchemaError => "PROVIDER_SCHEMA_ERROR",
            ErrorCode::TimeoutError => "TIMEOUT_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Timeout(30_000).is_retryable());
        assert!(
            Error::RateLimited {
                retry_after_ms: Some(1000)
            }
            .is_retryable()
        );
        assert!(
            Error::Provider {
                provider: Some(ProviderId::VendorA),
                message: "upstream 500".into(),
                status: Some(500),
                retryable: false,
            }
            .is_retryable()
        );
        assert!(
            !Error::Provider {
                provider: Some(ProviderId::VendorA),
                message: "bad request".into(),
                status: Some(400),
                retryable: false,
            }
            .is_retryable()
        );
        assert!(
            !Error::ProviderSchema {
                provider: Some(ProviderId::VendorB),
                message: "missing usage".into(),
                raw: serde_json::json!({}),
            }
            .is_retryable()
        );
        assert!(!Error::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(Error::Validation("x".into()).code().http_status(), 400);
        assert_eq!(Error::Unauthorized("x".into()).code().http_status(), 401);
        assert_eq!(Error::Conflict("x".into()).code().http_status(), 409);
        assert_eq!(
            Error::RateLimited {
                retry_after_ms: None
            }
            .code()
            .http_status(),
            429
        );
        assert_eq!(Error::Timeout(1).code().http_status(), 504);
        assert_eq!(Error::Database("x".into()).code().http_status(), 500);
        assert_eq!(
            Error::ProviderSchema {
                provider: None,
                message: "x".into(),
                raw: serde_json::Value::Null,
            }
            .code()
            .http_status(),
            502
        );
    }

    #[test]
    fn test_code_strings_are_screaming_snake() {
        assert_eq!(ErrorCode::ValidationError.as_str(), "VALIDATION_ERROR");
        assert_eq!(
            ErrorCode::ProviderSchemaError.as_str(),
            "PROVIDER_SCHEMA_ERROR"
        );
        assert_eq!(ErrorCode::TimeoutError.as_str(), "TIMEOUT_ERROR");
    }

    #[test]
    fn test_rate_limited_display_includes_hint() {
        let err = Error::RateLimited {
            retry_after_ms: Some(1500),
        };
        assert!(err.to_string().contains("1500ms"));

        let err = Error::RateLimited {
            retry_after_ms: None,
        };
        assert_eq!(err.to_string(), "Rate limit exceeded");
    }
}
