//! API-key authentication
//!
//! `X-API-Key: <plaintext>`; lookup is by hex SHA-256 digest, so the
//! plaintext is never stored and never logged. Role checks gate the write
//! surface.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use vocalbridge_core::{
    Error, Result,
    store::TenantStore,
    types::{ApiKeyRole, TenantId},
};

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::CorrelationId;

pub const API_KEY_HEADER: &str = "x-api-key";

/// How many leading plaintext characters are kept for display.
const PREFIX_DISPLAY_LEN: usize = 12;
const KEY_RANDOM_LEN: usize = 32;

/// Extension carrying the authenticated principal.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant_id: TenantId,
    pub api_key_id: Uuid,
    pub role: ApiKeyRole,
}

impl AuthContext {
    /// Writes require ADMIN.
    pub fn require_admin(&self) -> Result<()> {
        if self.role != ApiKeyRole::Admin {
            return Err(Error::Forbidden(
                "this operation requires an ADMIN key".to_string(),
            ));
        }
        Ok(())
    }
}

/// Hex SHA-256 of a plaintext key.
pub fn hash_key(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Generate a fresh key: `(plaintext, display_prefix, hash)`. The plaintext
/// is returned to the caller exactly once.
pub fn generate_key(prefix: &str) -> (String, String, String) {
    let random: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_RANDOM_LEN)
        .map(char::from)
        .collect();
    let plaintext = format!("{}{}", prefix, random);
    let display = plaintext.chars().take(PREFIX_DISPLAY_LEN).collect();
    let hash = hash_key(&plaintext);
    (plaintext, display, hash)
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    let correlation_id = req
        .extensions()
        .get::<CorrelationId>()
        .map(|c| c.0.clone())
        .unwrap_or_default();

    let plaintext = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ApiError::new(
                Error::Unauthorized("missing X-API-Key header".to_string()),
                correlation_id.clone(),
            )
        })?;

    let key = state
        .store
        .find_api_key_by_hash(&hash_key(plaintext))
        .await
        .map_err(|e| ApiError::new(e, correlation_id.clone()))?
        .ok_or_else(|| {
            ApiError::new(
                Error::Unauthorized("unknown API key".to_string()),
                correlation_id.clone(),
            )
        })?;

    if !key.is_valid(chrono::Utc::now()) {
        return Err(ApiError::new(
            Error::Unauthorized("API key is revoked or expired".to_string()),
            correlation_id,
        ));
    }

    // Best-effort; a failed bump must not fail the request.
    state.store.touch_api_key(key.id).await.ok();

    req.extensions_mut().insert(AuthContext {
        tenant_id: key.tenant_id,
        api_key_id: key.id,
        role: key.role,
    });
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_hex() {
        let hash = hash_key("vb_live_abc123");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_key("vb_live_abc123"));
        assert_ne!(hash, hash_key("vb_live_abc124"));
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_key_shape() {
        let (plaintext, display, hash) = generate_key("vb_live_");
        assert!(plaintext.starts_with("vb_live_"));
        assert_eq!(plaintext.len(), "vb_live_".len() + KEY_RANDOM_LEN);
        assert_eq!(display, &plaintext[..PREFIX_DISPLAY_LEN]);
        assert_eq!(hash, hash_key(&plaintext));

        // Two keys never collide.
        let (other, _, _) = generate_key("vb_live_");
        assert_ne!(plaintext, other);
    }

    #[test]
    fn test_require_admin() {
        let admin = AuthContext {
            tenant_id: TenantId::new(),
            api_key_id: Uuid::new_v4(),
            role: ApiKeyRole::Admin,
        };
        assert!(admin.require_admin().is_ok());

        let analyst = AuthContext {
            role: ApiKeyRole::Analyst,
            ..admin
        };
        assert!(matches!(
            analyst.require_admin().unwrap_err(),
            Error::Forbidden(_)
        ));
    }
}
