//! Per-session mutual exclusion
//!
//! At most one in-flight message per session across the processing fleet.
//! Acquisition is non-blocking: a loser fails fast with `Error::Conflict` and
//! is expected to retry later. Stale locks (holder died without releasing)
//! are reclaimed after a timeout.

use crate::Result;
use crate::types::SessionId;

/// Default staleness cutoff for abandoned locks.
pub const LOCK_STALE_AFTER_SECS: u64 = 30;

/// Held for the duration of a critical section; releasing happens on drop so
/// every exit path, including panics, gives the lock back.
pub trait LockGuard: Send + std::fmt::Debug {}

#[async_trait::async_trait]
pub trait SessionLock: Send + Sync {
    /// Try to acquire the lock for a session. Fails with `Error::Conflict`
    /// when another holder is active; never blocks waiting for them.
    async fn try_acquire(&self, session_id: SessionId) -> Result<Box<dyn LockGuard>>;
}
