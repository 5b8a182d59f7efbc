//! HTTP surface of the gateway
//!
//! Axum router, API-key authentication, correlation-id plumbing, the uniform
//! error envelope, and the handlers for every `/api/v1` route. The binary in
//! `main.rs` wires this to a store, providers, and the job worker.

pub mod app;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;

pub use app::{AppState, build_router};
pub use config::ServerConfig;
pub use error::ApiError;
