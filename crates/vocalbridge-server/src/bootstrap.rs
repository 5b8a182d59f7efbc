//! Process wiring
//!
//! Tracing, store/lock selection, provider registration, worker spawn, and
//! the axum serve loop with graceful shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vocalbridge_core::{lock::SessionLock, provider::ChatProvider, store::Store, types::ProviderId};
use vocalbridge_pipeline::{MessagePipeline, SessionService};
use vocalbridge_providers::{RetryPolicy, VendorAAdapter, VendorBAdapter, orchestrator::Orchestrator};
use vocalbridge_store::{
    AdvisorySessionLock, InMemorySessionLock, MemoryStore, PgStore, PgStoreConfig,
};
use vocalbridge_tools::ToolRegistry;
use vocalbridge_worker::{JobWorker, WorkerConfig};

use crate::app::{AppState, build_router};
use crate::config::ServerConfig;

pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Build the application state from configuration: Postgres with advisory
/// locks when a database URL is set, otherwise single-node in-memory.
pub async fn build_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let (store, lock): (Arc<dyn Store>, Arc<dyn SessionLock>) = match &config.database.url {
        Some(url) => {
            info!("Using PostgreSQL store");
            let pg = PgStore::with_config(
                url,
                PgStoreConfig {
                    max_connections: config.database.connection_limit,
                    acquire_timeout: Duration::from_secs(config.database.pool_timeout_secs),
                    statement_timeout: Duration::from_secs(config.database.statement_timeout_secs),
                },
            )
            .await?;
            let lock = AdvisorySessionLock::new(pg.pool().clone());
            (Arc::new(pg), Arc::new(lock))
        }
        None => {
            info!("No database configured, using in-memory store (single-node mode)");
            let lock = Arc::new(InMemorySessionLock::new());
            lock.spawn_sweeper(Duration::from_secs(10));
            (Arc::new(MemoryStore::new()), lock)
        }
    };

    let providers: HashMap<ProviderId, Arc<dyn ChatProvider>> = HashMap::from([
        (
            ProviderId::VendorA,
            Arc::new(VendorAAdapter::new()) as Arc<dyn ChatProvider>,
        ),
        (
            ProviderId::VendorB,
            Arc::new(VendorBAdapter::new()) as Arc<dyn ChatProvider>,
        ),
    ]);
    let orchestrator = Arc::new(Orchestrator::new(providers, RetryPolicy::default()));
    let tools = Arc::new(ToolRegistry::with_builtins());

    let pipeline = Arc::new(MessagePipeline::new(
        store.clone(),
        lock,
        orchestrator,
        tools,
    ));
    let sessions = Arc::new(SessionService::new(store.clone()));

    Ok(AppState {
        store,
        pipeline,
        sessions,
        api_key_prefix: config.api_key_prefix.clone(),
        audio_storage_dir: config.voice.audio_storage_dir.clone(),
        voice_mode: config.voice.mode.clone(),
    })
}

/// Run the server until ctrl-c.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let state = build_state(&config).await?;

    // Job workers share the store and pipeline with the HTTP surface.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker_handles = Vec::new();
    if config.worker.enabled {
        for _ in 0..config.worker.count.max(1) {
            let worker = JobWorker::new(
                state.store.clone(),
                state.pipeline.clone(),
                WorkerConfig {
                    poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
                    ..WorkerConfig::default()
                },
            )?;
            let rx = shutdown_rx.clone();
            worker_handles.push(tokio::spawn(async move { worker.run(rx).await }));
        }
    }

    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "VocalBridge gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    shutdown_tx.send(true).ok();
    for handle in worker_handles {
        handle.await.ok();
    }
    Ok(())
}
