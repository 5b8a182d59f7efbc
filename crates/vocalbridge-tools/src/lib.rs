//! Tool registry and builtin tools
//!
//! Named callable units with typed inputs, declared permissions and limits,
//! hard execution timeouts, and per-invocation audit records.

pub mod invoice_lookup;
pub mod registry;

pub use invoice_lookup::InvoiceLookup;
pub use registry::{
    DataAccess, Tool, ToolContext, ToolInvocation, ToolLimits, ToolOutcome, ToolPermissions,
    ToolRegistry,
};
