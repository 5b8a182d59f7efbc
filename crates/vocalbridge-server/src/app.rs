//! Router assembly

use axum::middleware as axum_middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use vocalbridge_core::store::Store;
use vocalbridge_pipeline::{MessagePipeline, SessionService};

use crate::auth::auth_middleware;
use crate::handlers;
use crate::middleware::correlation_middleware;

/// Everything the handlers need, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub pipeline: Arc<MessagePipeline>,
    pub sessions: Arc<SessionService>,
    pub api_key_prefix: String,
    pub audio_storage_dir: Option<String>,
    pub voice_mode: Option<String>,
}

/// The full `/api/v1` surface. Everything except tenant signup sits behind
/// API-key authentication; the correlation-id layer wraps both.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new().route("/api/v1/tenants", post(handlers::tenants::create_tenant));

    let protected = Router::new()
        .route("/api/v1/tenants/me", get(handlers::tenants::me))
        .route(
            "/api/v1/api-keys",
            get(handlers::api_keys::list).post(handlers::api_keys::create),
        )
        .route("/api/v1/api-keys/{id}", delete(handlers::api_keys::revoke))
        .route("/api/v1/api-keys/{id}/rotate", post(handlers::api_keys::rotate))
        .route(
            "/api/v1/agents",
            get(handlers::agents::list).post(handlers::agents::create),
        )
        .route(
            "/api/v1/agents/{id}",
            get(handlers::agents::get_one)
                .put(handlers::agents::update)
                .delete(handlers::agents::remove),
        )
        .route("/api/v1/agents/{id}/demo", post(handlers::agents::demo))
        .route(
            "/api/v1/sessions",
            get(handlers::sessions::list).post(handlers::sessions::create),
        )
        .route("/api/v1/sessions/{id}", get(handlers::sessions::get_one))
        .route("/api/v1/sessions/{id}/end", post(handlers::sessions::end))
        .route(
            "/api/v1/sessions/{id}/messages",
            get(handlers::messages::list).post(handlers::messages::create),
        )
        .route(
            "/api/v1/sessions/{id}/messages/async",
            post(handlers::messages::create_async),
        )
        .route("/api/v1/jobs", get(handlers::jobs::list))
        .route("/api/v1/jobs/{id}", get(handlers::jobs::get_one))
        .route("/api/v1/usage", get(handlers::usage::totals))
        .route("/api/v1/usage/breakdown", get(handlers::usage::breakdown))
        .route("/api/v1/usage/top-agents", get(handlers::usage::top_agents))
        .route(
            "/api/v1/sessions/{id}/voice/transcript",
            post(handlers::voice::transcript),
        )
        .route(
            "/api/v1/sessions/{id}/voice/store-audio",
            post(handlers::voice::store_audio),
        )
        .route(
            "/api/v1/sessions/{id}/voice/{artifact_id}",
            get(handlers::voice::fetch_audio),
        )
        .route(
            "/api/v1/sessions/{id}/voice/{artifact_id}/metadata",
            get(handlers::voice::metadata),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    public
        .merge(protected)
        .layer(axum_middleware::from_fn(correlation_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
