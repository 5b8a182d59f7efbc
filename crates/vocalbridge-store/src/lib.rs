//! Storage backends for the gateway
//!
//! Two implementations of the core store traits:
//!
//! - [`memory::MemoryStore`]: single mutex over plain maps. Single-node
//!   deployments and tests.
//! - [`postgres::PgStore`]: sqlx over PostgreSQL, with schema migrations run
//!   from the constructor. Fleet deployments.
//!
//! Session locks (one in-flight message per session) live in [`locks`], with
//! the same split: an in-memory map for one process, Postgres advisory locks
//! for many.

pub mod locks;
pub mod memory;
pub mod postgres;

pub use locks::{AdvisorySessionLock, InMemorySessionLock};
pub use memory::MemoryStore;
pub use postgres::{PgStore, PgStoreConfig};
