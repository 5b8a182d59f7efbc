//! Durable async job worker
//!
//! Polls the jobs table, leases work, executes it through the message
//! pipeline, and delivers webhook callbacks. Multiple workers may run per
//! process and multiple processes may run simultaneously; the claim
//! transaction in the store is the only coordination point.

pub mod callbacks;
pub mod worker;

pub use callbacks::CallbackClient;
pub use worker::{JobWorker, WorkerConfig};
