//! Deterministic stand-ins for the model and the tools.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::plan_parser::PlannedCall;
use crate::inference::{GenerationParams, InferenceError, LanguageModel};
use crate::tools::{ToolArgs, ToolCapability, ToolError, ToolName};

/// Build a planned call from a JSON object literal.
pub fn call(name: &str, args: Value) -> PlannedCall {
    PlannedCall {
        name: name.to_string(),
        args: args.as_object().cloned().unwrap_or_default(),
    }
}

// ─── ScriptedModel ──────────────────────────────────────────────────────────

/// One scripted model reply.
pub enum Reply {
    Text(String),
    Fail(InferenceError),
    /// Never answers within any realistic timeout.
    Hang,
}

/// Replays a fixed list of replies and records every prompt it sees.
#[derive(Clone)]
pub struct ScriptedModel {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into())),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shorthand for text-only scripts.
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Reply::Text(t.to_string())).collect())
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, InferenceError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Reply::Text(t)) => Ok(t),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(InferenceError::Timeout {
                    duration_ms: 3_600_000,
                })
            }
            None => Err(InferenceError::SchemaMismatch {
                reason: "script exhausted".into(),
            }),
        }
    }
}

// ─── StubTool ───────────────────────────────────────────────────────────────

/// Configurable tool capability that tracks concurrency.
pub struct StubTool {
    name: ToolName,
    enabled: bool,
    latency: Duration,
    failure: Option<String>,
    payload: Option<Value>,
    invocations: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl StubTool {
    pub fn new(name: ToolName) -> Self {
        Self {
            name,
            enabled: true,
            latency: Duration::ZERO,
            failure: None,
            payload: None,
            invocations: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn invocations(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.invocations)
    }

    pub fn peak_in_flight(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak)
    }
}

#[async_trait]
impl ToolCapability for StubTool {
    fn name(&self) -> ToolName {
        self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(reason) = &self.failure {
            return Err(ToolError::Upstream {
                tool: self.name.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(self.payload.clone().unwrap_or_else(|| {
            json!({
                "tool": self.name.as_str(),
                "args": format!("{args:?}"),
            })
        }))
    }
}
