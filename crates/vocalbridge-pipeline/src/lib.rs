//! Message processing pipeline
//!
//! The end-to-end handling of one user message: idempotency, per-session
//! locking, history assembly, provider dispatch, the tool-call loop,
//! transcript persistence, and exactly-once billing. Session lifecycle
//! (create-or-reuse, end, demo) lives in [`sessions`].

pub mod billing;
pub mod history;
pub mod pipeline;
pub mod sessions;

pub use billing::BillingRecorder;
pub use pipeline::{MessageInput, MessagePipeline, MessageReply, ReplyMetadata};
pub use sessions::SessionService;
