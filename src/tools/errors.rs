//! Tool error types.

use thiserror::Error;

/// Errors raised while resolving or running a tool capability.
///
/// These never escape the dispatcher: each one is recorded as the `{error}`
/// result of its step.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Name is not one of the known tools, or is known but not registered.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// Tool is registered but switched off (e.g. missing credentials).
    #[error("tool '{name}' is disabled")]
    Disabled { name: String },

    /// Arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The call did not finish within its allotted time.
    #[error("tool call '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// The upstream data service failed (connect error, non-2xx, bad body).
    #[error("upstream error for '{tool}': {reason}")]
    Upstream { tool: String, reason: String },

    /// The upstream answered but had nothing usable for this input.
    #[error("no data for '{tool}': {reason}")]
    NoData { tool: String, reason: String },
}

impl ToolError {
    /// Short reason stored in the step's `{error}` marker.
    ///
    /// Unknown and disabled tools share one marker so the planner cannot tell
    /// a missing capability from one it is not allowed to use.
    pub fn marker(&self) -> String {
        match self {
            ToolError::UnknownTool { .. } | ToolError::Disabled { .. } => {
                "unknown_or_disabled_tool".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether this is an argument validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, ToolError::InvalidArguments { .. })
    }
}
