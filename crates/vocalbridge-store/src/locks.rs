//! Session lock implementations
//!
//! Non-blocking per-session mutual exclusion. The in-memory variant covers a
//! single process; the advisory variant rides Postgres advisory locks so the
//! guarantee holds across a fleet. Both release on guard drop, so every exit
//! path including panics gives the lock back.

use dashmap::DashMap;
use sqlx::PgPool;
use sqlx::pool::PoolConnection;
use sqlx::postgres::Postgres;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use vocalbridge_core::{
    Error, Result,
    lock::{LOCK_STALE_AFTER_SECS, LockGuard, SessionLock},
    types::SessionId,
};

#[derive(Debug)]
struct Held {
    owner: Uuid,
    held_at: Instant,
}

/// Map of session id to holder, with stale entries reclaimed after a timeout
/// so a panicked-and-aborted task cannot strand its session forever.
pub struct InMemorySessionLock {
    held: Arc<DashMap<SessionId, Held>>,
    stale_after: Duration,
}

impl InMemorySessionLock {
    pub fn new() -> Self {
        Self::with_stale_after(Duration::from_secs(LOCK_STALE_AFTER_SECS))
    }

    pub fn with_stale_after(stale_after: Duration) -> Self {
        Self {
            held: Arc::new(DashMap::new()),
            stale_after,
        }
    }

    /// Drop entries older than the staleness cutoff. Returns how many were
    /// cleared. Run periodically via [`spawn_sweeper`](Self::spawn_sweeper).
    pub fn sweep(&self) -> usize {
        let stale_after = self.stale_after;
        let before = self.held.len();
        self.held.retain(|session_id, held| {
            let keep = held.held_at.elapsed() < stale_after;
            if !keep {
                warn!(session_id = %session_id, "Reclaiming stale session lock");
            }
            keep
        });
        before - self.held.len()
    }

    /// Background task sweeping stale locks every `interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let lock = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                lock.sweep();
            }
        })
    }
}

impl Default for InMemorySessionLock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct InMemoryGuard {
    held: Arc<DashMap<SessionId, Held>>,
    session_id: SessionId,
    owner: Uuid,
}

impl LockGuard for InMemoryGuard {}

impl Drop for InMemoryGuard {
    fn drop(&mut self) {
        // Remove only our own entry; a reclaimed-and-reacquired lock belongs
        // to someone else now.
        self.held
            .remove_if(&self.session_id, |_, held| held.owner == self.owner);
    }
}

#[async_trait::async_trait]
impl SessionLock for InMemorySessionLock {
    async fn try_acquire(&self, session_id: SessionId) -> Result<Box<dyn LockGuard>> {
        let owner = Uuid::new_v4();
        let stale_after = self.stale_after;

        let mut acquired = false;
        let mut entry = self.held.entry(session_id).or_insert_with(|| {
            acquired = true;
            Held {
                owner,
                held_at: Instant::now(),
            }
        });
        if !acquired {
            if entry.held_at.elapsed() < stale_after {
                return Err(Error::Conflict(
                    "another message is being processed for this session; retry shortly"
                        .to_string(),
                ));
            }
            // Stale holder: take over in place, still under the entry lock.
            warn!(
                session_id = %session_id,
                age_secs = entry.held_at.elapsed().as_secs(),
                "Taking over stale session lock"
            );
            entry.owner = owner;
            entry.held_at = Instant::now();
        }
        drop(entry);

        debug!(session_id = %session_id, "Acquired session lock");
        Ok(Box::new(InMemoryGuard {
            held: Arc::clone(&self.held),
            session_id,
            owner,
        }))
    }
}

/// Postgres advisory-lock variant for multi-node deployments.
///
/// The lock is keyed by a 64-bit hash of the session id and held on a
/// dedicated pooled connection; dropping the guard unlocks and returns the
/// connection. Advisory locks die with the connection, so a crashed process
/// cannot strand a session.
pub struct AdvisorySessionLock {
    pool: PgPool,
}

impl AdvisorySessionLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug)]
struct AdvisoryGuard {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

impl LockGuard for AdvisoryGuard {}

impl Drop for AdvisoryGuard {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let key = self.key;
            tokio::spawn(async move {
                if let Err(err) = sqlx::query("SELECT pg_advisory_unlock($1)")
                    .bind(key)
                    .execute(&mut *conn)
                    .await
                {
                    // The connection is dropped either way, which also
                    // releases the advisory lock server-side.
                    warn!(key, error = %err, "Failed to release advisory session lock");
                }
            });
        }
    }
}

#[async_trait::async_trait]
impl SessionLock for AdvisorySessionLock {
    async fn try_acquire(&self, session_id: SessionId) -> Result<Box<dyn LockGuard>> {
        let key = session_id.lock_key();
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::Database(format!("Failed to acquire connection: {}", e)))?;

        let granted: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| Error::Database(format!("Advisory lock query failed: {}", e)))?;

        if !granted {
            return Err(Error::Conflict(
                "another message is being processed for this session; retry shortly".to_string(),
            ));
        }

        debug!(session_id = %session_id, key, "Acquired advisory session lock");
        Ok(Box::new(AdvisoryGuard {
            conn: Some(conn),
            key,
        }))
    }
}
