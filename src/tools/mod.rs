//! Tools — the data-retrieval capabilities the planner can call.
//!
//! - `args`: closed [`ToolName`] set and typed argument schemas
//! - `registry`: [`ToolCapability`] trait and the [`ToolRegistry`]
//! - `weather`, `soil`, `market`: built-in HTTP capabilities
//! - `http`: shared client construction and JSON helpers
//!
//! Recos, satellite and rag have no built-in implementation; callers supply
//! them as [`ToolCapability`] objects.

pub mod args;
pub mod errors;
pub mod http;
pub mod market;
pub mod registry;
pub mod soil;
pub mod weather;

// Re-exports for convenience
pub use args::{CoordArgs, MarketArgs, RagArgs, ToolArgs, ToolName};
pub use errors::ToolError;
pub use registry::{ToolCapability, ToolRegistry};
