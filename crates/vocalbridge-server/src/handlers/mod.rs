//! Route handlers

pub mod agents;
pub mod api_keys;
pub mod jobs;
pub mod messages;
pub mod sessions;
pub mod tenants;
pub mod usage;
pub mod voice;

use crate::error::ApiError;
use crate::middleware::CorrelationId;
use vocalbridge_core::Error;

/// Attach the request's correlation id to a core error.
pub(crate) fn err(correlation: &CorrelationId) -> impl Fn(Error) -> ApiError + '_ {
    move |error| ApiError::new(error, correlation.0.clone())
}
