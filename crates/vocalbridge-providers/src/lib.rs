//! Provider adapters and the dispatch orchestrator
//!
//! Two mocked vendor adapters translate between the neutral chat shapes and
//! each vendor's wire format, with configurable fault injection. The
//! orchestrator wraps adapter calls with timeouts, bounded retries, jittered
//! backoff, and fallback-provider selection.

pub mod backoff;
pub mod mock;
pub mod orchestrator;
pub mod vendor_a;
pub mod vendor_b;

pub use backoff::RetryPolicy;
pub use mock::FaultProfile;
pub use orchestrator::{AttemptRecord, DispatchOutcome, DispatchSuccess, Orchestrator};
pub use vendor_a::VendorAAdapter;
pub use vendor_b::VendorBAdapter;
