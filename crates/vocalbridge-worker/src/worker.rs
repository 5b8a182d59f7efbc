//! The job worker loop
//!
//! Claim, execute, settle. Repeated attempts forward the job's idempotency
//! key into the pipeline so partially-processed work collapses to the stored
//! response instead of double-billing.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use vocalbridge_core::{
    Error, Result,
    store::{JobStore, Store},
    types::{Job, JobStatus, JobType, SessionId},
};
use vocalbridge_pipeline::{MessageInput, MessagePipeline};

use crate::callbacks::{CallbackClient, CallbackEnvelope};

static WORKER_SEQ: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    /// Lease length stamped onto claimed jobs.
    pub lease: ChronoDuration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            lease: ChronoDuration::minutes(5),
        }
    }
}

/// Input shape for SEND_MESSAGE and VOICE_PROCESS jobs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageJobInput {
    session_id: SessionId,
    /// Message text; the voice path puts the client-side transcript here.
    content: String,
    correlation_id: Option<String>,
    audio_artifact_id: Option<uuid::Uuid>,
}

pub struct JobWorker {
    store: Arc<dyn Store>,
    pipeline: Arc<MessagePipeline>,
    callbacks: CallbackClient,
    worker_id: String,
    config: WorkerConfig,
}

impl JobWorker {
    pub fn new(
        store: Arc<dyn Store>,
        pipeline: Arc<MessagePipeline>,
        config: WorkerConfig,
    ) -> Result<Self> {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let seq = WORKER_SEQ.fetch_add(1, Ordering::Relaxed);
        let worker_id = format!("{}:{}-{}", host, std::process::id(), seq);
        Ok(Self {
            store,
            pipeline,
            callbacks: CallbackClient::new()?,
            worker_id,
            config,
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Rescue jobs stranded by crashed workers, then poll until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        match self.store.recover_expired_jobs().await {
            Ok(0) => {}
            Ok(recovered) => info!(worker_id = %self.worker_id, recovered, "Recovered expired jobs"),
            Err(err) => warn!(worker_id = %self.worker_id, error = %err, "Startup recovery failed"),
        }

        info!(worker_id = %self.worker_id, "Job worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.tick().await {
                // Work was done; poll again immediately in case more queued.
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => break,
                    }
                }
                Err(err) => {
                    error!(worker_id = %self.worker_id, error = %err, "Poll tick failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
        info!(worker_id = %self.worker_id, "Job worker stopped");
    }

    /// Claim and execute at most one job. Returns whether one was processed.
    pub async fn tick(&self) -> Result<bool> {
        let Some(job) = self
            .store
            .claim_job(&self.worker_id, self.config.lease)
            .await?
        else {
            return Ok(false);
        };

        debug!(
            worker_id = %self.worker_id,
            job_id = %job.id,
            attempt = job.attempts,
            "Claimed job"
        );

        match self.execute(&job).await {
            Ok(output) => {
                let completed = self.store.complete_job(job.id, output).await?;
                self.send_callback(&completed).await;
            }
            Err(err) => {
                warn!(
                    worker_id = %self.worker_id,
                    job_id = %job.id,
                    attempt = job.attempts,
                    error = %err,
                    "Job attempt failed"
                );
                let settled = self.store.fail_job_attempt(job.id, &err.to_string()).await?;
                if settled.status == JobStatus::Failed {
                    self.send_callback(&settled).await;
                }
            }
        }
        Ok(true)
    }

    async fn execute(&self, job: &Job) -> Result<serde_json::Value> {
        match job.job_type {
            // Voice jobs carry a client-side transcript; from here on they
            // are ordinary messages with an attached audio artifact.
            JobType::SendMessage | JobType::VoiceProcess => {
                let input: SendMessageJobInput = serde_json::from_value(job.input.clone())
                    .map_err(|e| Error::Validation(format!("invalid job input: {}", e)))?;

                self.store.set_job_progress(job.id, 10).await.ok();

                let reply = self
                    .pipeline
                    .send_message(
                        job.tenant_id,
                        input.session_id,
                        MessageInput {
                            content: input.content,
                            // Repeated attempts collapse at the pipeline layer.
                            idempotency_key: job.idempotency_key.clone(),
                            correlation_id: input.correlation_id,
                            audio_artifact_id: input.audio_artifact_id,
                        },
                    )
                    .await?;

                Ok(serde_json::json!({
                    "messageId": reply.message.id,
                    "sessionId": reply.message.session_id,
                    "content": reply.message.content,
                    "metadata": reply.metadata,
                }))
            }
        }
    }

    async fn send_callback(&self, job: &Job) {
        let Some(url) = &job.callback_url else {
            return;
        };
        let envelope = CallbackEnvelope {
            job_id: job.id,
            job_type: job.job_type,
            status: match job.status {
                JobStatus::Completed => "COMPLETED".to_string(),
                JobStatus::Failed => "FAILED".to_string(),
                other => format!("{:?}", other).to_uppercase(),
            },
            result: job.output.clone(),
            error: job.error_message.clone(),
            completed_at: job.completed_at.unwrap_or_else(Utc::now),
        };
        if self.callbacks.deliver(url, &envelope).await
            && let Err(err) = self.store.mark_callback_sent(job.id).await
        {
            warn!(job_id = %job.id, error = %err, "Failed to record callback delivery");
        }
    }
}
