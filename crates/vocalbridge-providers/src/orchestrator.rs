//! Dispatch orchestrator
//!
//! Wraps adapter calls with per-vendor timeouts, bounded retries with
//! jittered exponential backoff, and fallback-provider selection. State is
//! purely local per dispatch; attempt numbers are cumulative across the
//! primary and fallback paths so persisted call records retain global
//! ordering.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use vocalbridge_core::{
    Error, Result,
    chat::{ChatRequest, ChatResponse},
    provider::ChatProvider,
    types::{CallStatus, ProviderId},
};

use crate::backoff::RetryPolicy;

/// One outbound attempt, successful or not. The pipeline persists each of
/// these as a provider-call row so analytics never lose sight of retries.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub provider: ProviderId,
    pub is_fallback: bool,
    /// Cumulative across both paths, 1-based.
    pub attempt_number: i32,
    pub status: CallStatus,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub latency_ms: i64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// The winning response plus dispatch metadata.
#[derive(Debug, Clone)]
pub struct DispatchSuccess {
    pub response: ChatResponse,
    pub provider: ProviderId,
    pub used_fallback: bool,
    /// Cumulative number of the attempt that produced the response.
    pub attempt_number: i32,
}

/// Everything a dispatch produced: the per-attempt records (always) and the
/// outcome (success or the last error observed).
#[derive(Debug)]
pub struct DispatchOutcome {
    pub attempts: Vec<AttemptRecord>,
    pub result: Result<DispatchSuccess>,
    /// Wall time of the whole dispatch including backoff sleeps.
    pub total_latency_ms: i64,
}

impl DispatchOutcome {
    pub fn total_attempts(&self) -> i32 {
        self.attempts.len() as i32
    }
}

/// Coordinates the registered providers for one deployment.
pub struct Orchestrator {
    providers: HashMap<ProviderId, Arc<dyn ChatProvider>>,
    policy: RetryPolicy,
}

impl Orchestrator {
    pub fn new(providers: HashMap<ProviderId, Arc<dyn ChatProvider>>, policy: RetryPolicy) -> Self {
        Self { providers, policy }
    }

    pub fn with_defaults(providers: HashMap<ProviderId, Arc<dyn ChatProvider>>) -> Self {
        Self::new(providers, RetryPolicy::default())
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run a request against the primary provider, falling back to the
    /// secondary when the primary path is exhausted.
    ///
    /// A fallback equal to the primary means "no vendor switch": the primary
    /// path's attempts already covered retries against that vendor, so no
    /// second path runs.
    pub async fn dispatch(
        &self,
        primary: ProviderId,
        fallback: Option<ProviderId>,
        request: &ChatRequest,
    ) -> DispatchOutcome {
        let started = Instant::now();
        let mut attempts = Vec::new();
        let mut counter = 0i32;

        let primary_result = self
            .run_path(primary, false, &mut counter, &mut attempts, request)
            .await;

        let result = match primary_result {
            Ok(success) => Ok(success),
            Err(primary_err) => match fallback {
                Some(fb) if fb != primary => {
                    info!(
                        primary = %primary,
                        fallback = %fb,
                        error = %primary_err,
                        "Primary path exhausted, switching to fallback"
                    );
                    self.run_path(fb, true, &mut counter, &mut attempts, request)
                        .await
                }
                _ => Err(primary_err),
            },
        };

        DispatchOutcome {
            attempts,
            result,
            total_latency_ms: started.elapsed().as_millis() as i64,
        }
    }

    /// Up to `max_attempts` attempts against one provider. Non-retryable
    /// errors abort the path immediately.
    async fn run_path(
        &self,
        provider_id: ProviderId,
        is_fallback: bool,
        counter: &mut i32,
        attempts: &mut Vec<AttemptRecord>,
        request: &ChatRequest,
    ) -> Result<DispatchSuccess> {
        let provider = self
            .providers
            .get(&provider_id)
            .ok_or_else(|| Error::Internal(format!("provider {} is not registered", provider_id)))?;

        let mut last_err = None;
        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                let delay = {
                    let mut rng = rand::rng();
                    self.policy.jittered_delay(attempt - 1, &mut rng)
                };
                debug!(
                    provider = %provider_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }

            *counter += 1;
            let attempt_number = *counter;
            let call_started = Instant::now();
            let budget = provider.request_timeout();

            let outcome = match tokio::time::timeout(budget, provider.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(budget.as_millis() as u64)),
            };
            let latency_ms = call_started.elapsed().as_millis() as i64;

            match outcome {
                Ok(response) => {
                    attempts.push(AttemptRecord {
                        provider: provider_id,
                        is_fallback,
                        attempt_number,
                        status: CallStatus::Success,
                        tokens_in: response.tokens_in,
                        tokens_out: response.tokens_out,
                        latency_ms,
                        error_code: None,
                        error_message: None,
                    });
                    info!(
                        provider = %provider_id,
                        attempt_number,
                        is_fallback,
                        tokens_in = response.tokens_in,
                        tokens_out = response.tokens_out,
                        "Provider call succeeded"
                    );
                    return Ok(DispatchSuccess {
                        response,
                        provider: provider_id,
                        used_fallback: is_fallback,
                        attempt_number,
                    });
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    warn!(
                        provider = %provider_id,
                        attempt_number,
                        is_fallback,
                        retryable,
                        error = %err,
                        "Provider call failed"
                    );
                    attempts.push(AttemptRecord {
                        provider: provider_id,
                        is_fallback,
                        attempt_number,
                        status: status_for(&err),
                        tokens_in: 0,
                        tokens_out: 0,
                        latency_ms,
                        error_code: Some(err.code().as_str().to_string()),
                        error_message: Some(err.to_string()),
                    });
                    last_err = Some(err);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Internal("provider path produced no attempts".to_string())))
    }
}

fn status_for(err: &Error) -> CallStatus {
    match err {
        Error::Timeout(_) => CallStatus::Timeout,
        Error::RateLimited { .. } => CallStatus::RateLimited,
        _ => CallStatus::Failed,
    }
}
