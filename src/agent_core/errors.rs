//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;
use crate::tools::ToolError;

/// Errors that can occur during agent core operations.
///
/// Only the preference store returns these to callers. Inside the
/// orchestrator they are converted into operator-facing markers via
/// [`AgentError::marker`] and stored on the outcome.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The planning model call failed (network, timeout, schema).
    #[error("planner call failed: {reason}")]
    PlannerCall { reason: String },

    /// No valid decision could be extracted from the planner's text.
    #[error("planner output unparseable: {reason}")]
    PlannerParse { reason: String },

    /// Tool arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    Validation { tool: String, reason: String },

    /// A tool call failed or timed out.
    #[error("tool '{tool}' failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    /// The finalizer model call failed or timed out.
    #[error("finalizer failed: {reason}")]
    Finalize { reason: String },

    /// Finalizing was requested with an empty step log.
    #[error("no tool results to finalize from")]
    NoSteps,

    /// Database operation failed.
    #[error("database error: {reason}")]
    Database { reason: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl AgentError {
    /// Diagnostic string placed in an outcome's `error` field.
    pub fn marker(&self) -> String {
        match self {
            AgentError::PlannerCall { reason } => format!("planner_call_failed: {reason}"),
            AgentError::PlannerParse { reason } => format!("planner_parse_failed: {reason}"),
            AgentError::Validation { tool, reason } => {
                format!("validation_failed: {tool}: {reason}")
            }
            AgentError::ToolExecution { tool, reason } => format!("tool_failed: {tool}: {reason}"),
            AgentError::Finalize { reason } => format!("final_llm_failed: {reason}"),
            AgentError::NoSteps => "no_steps".to_string(),
            AgentError::Database { reason } => format!("database_error: {reason}"),
            AgentError::Serialization { reason } => format!("serialization_error: {reason}"),
        }
    }
}

impl From<ToolError> for AgentError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::InvalidArguments { tool, reason } => AgentError::Validation { tool, reason },
            ToolError::UnknownTool { name } | ToolError::Disabled { name } => {
                AgentError::ToolExecution {
                    tool: name,
                    reason: "unknown_or_disabled_tool".into(),
                }
            }
            ToolError::Timeout { ref tool, .. }
            | ToolError::Upstream { ref tool, .. }
            | ToolError::NoData { ref tool, .. } => AgentError::ToolExecution {
                tool: tool.clone(),
                reason: e.to_string(),
            },
        }
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Database {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Serialization {
            reason: e.to_string(),
        }
    }
}

impl AgentError {
    pub fn planner_call(e: &InferenceError) -> Self {
        AgentError::PlannerCall {
            reason: e.to_string(),
        }
    }

    pub fn finalize(e: &InferenceError) -> Self {
        AgentError::Finalize {
            reason: e.to_string(),
        }
    }
}
