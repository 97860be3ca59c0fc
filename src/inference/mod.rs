//! Inference — language-model access for the planner and finalizer.
//!
//! This module handles all communication with the model endpoint:
//! - Gemini `generateContent` and OpenAI-compatible chat completions
//! - Fallback chain management
//! - Agent configuration loading from `krishimitra.yaml`
//!
//! Callers depend on the [`LanguageModel`] trait, so swapping providers is a
//! config change, not a code change.

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

// Re-exports for convenience
pub use client::{InferenceClient, LanguageModel};
pub use config::{AgentSettings, ModelsConfig, OrchestratorConfig, Provider, ToolsConfig};
pub use errors::InferenceError;
pub use types::GenerationParams;
