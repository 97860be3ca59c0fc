//! Agent Core — planning loop and everything it drives.
//!
//! Submodules:
//! - `orchestrator`: Plan → execute → finalize state machine with salvage
//! - `planner`: Planner prompt construction and the planning call
//! - `plan_parser`: Extracts a decision from untrusted model text
//! - `plan_interpreter`: Market argument auto-fill from hints and preferences
//! - `tool_router`: Validated, time-bounded tool dispatch (single and batch)
//! - `finalizer`: Step digest and answer synthesis
//! - `gather`: Fixed fan-out workflow (all sources, one answer)
//! - `retry`: Declarative retry policy and wrapper
//! - `database`: SQLite farm profiles and preference lookup
//! - `tokens`: Truncation and token estimation helpers
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod database;
pub mod errors;
pub mod finalizer;
pub mod gather;
pub mod orchestrator;
pub mod plan_interpreter;
pub mod plan_parser;
pub mod planner;
pub mod retry;
pub mod tokens;
pub mod tool_router;
pub mod types;

#[cfg(test)]
pub mod test_support;

// Re-exports for convenience
pub use database::{FarmDatabase, FarmRecord, PreferenceLookup};
pub use errors::AgentError;
pub use finalizer::Finalizer;
pub use gather::{GatherOutcome, GatherWorkflow, SourcesUsed};
pub use orchestrator::Orchestrator;
pub use plan_parser::{parse_decision, PlanDecision, PlannedCall};
pub use planner::Planner;
pub use retry::{Backoff, RetryPolicy};
pub use tool_router::ToolDispatcher;
pub use types::{
    AgentOutcome, AgentRequest, FarmPreferences, LocationHints, SessionState, Step, ToolOutcome,
    APOLOGY,
};
