//! Tool dispatcher — runs planned tool calls and records them as steps.
//!
//! Handles:
//! - Name resolution against the closed tool set and the registry
//! - Argument validation against the tool's schema
//! - A per-tool timeout around every call
//! - Bounded-concurrency batches whose steps keep call order
//!
//! Every call yields exactly one [`Step`]. Failures of any kind become the
//! step's `{error}` result; nothing is raised past this module.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde_json::Value;

use super::errors::AgentError;
use super::plan_parser::PlannedCall;
use super::tokens::preview;
use super::types::{Step, ToolOutcome};
use crate::inference::ToolsConfig;
use crate::tools::{ToolArgs, ToolError, ToolName, ToolRegistry};

// ─── ToolDispatcher ─────────────────────────────────────────────────────────

/// Executes tool calls against a registry.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    config: ToolsConfig,
    max_parallel: usize,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, config: ToolsConfig, max_parallel: usize) -> Self {
        Self {
            registry,
            config,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    // ─── Dispatch ───────────────────────────────────────────────────────

    /// Run one call.
    pub async fn dispatch_single(&self, call: &PlannedCall) -> Step {
        let start = Instant::now();
        let result = self.execute(call).await;
        self.record(call, result, start)
    }

    /// Run a batch with at most `max_parallel` calls in flight.
    ///
    /// Returned steps are in call order regardless of completion order; a
    /// failing call does not affect its siblings.
    pub async fn dispatch_batch(&self, calls: &[PlannedCall]) -> Vec<Step> {
        tracing::info!(
            calls = calls.len(),
            max_parallel = self.max_parallel,
            "dispatching tool batch"
        );
        stream::iter(calls)
            .map(|call| self.dispatch_single(call))
            .buffered(self.max_parallel)
            .collect()
            .await
    }

    // ─── Execution ──────────────────────────────────────────────────────

    async fn execute(&self, call: &PlannedCall) -> Result<Value, ToolError> {
        let name: ToolName = call.name.parse()?;
        let tool = self.registry.get(name)?;
        let args = ToolArgs::parse(name, &call.args)?;
        let timeout = self.config.timeout_for(name);

        tokio::time::timeout(timeout, tool.invoke(args))
            .await
            .unwrap_or_else(|_| {
                Err(ToolError::Timeout {
                    tool: name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            })
    }

    fn record(&self, call: &PlannedCall, result: Result<Value, ToolError>, start: Instant) -> Step {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let outcome = match result {
            Ok(payload) => {
                let encoded = payload.to_string();
                tracing::info!(
                    tool = %call.name,
                    elapsed_ms,
                    result_len = encoded.len(),
                    "tool call succeeded"
                );
                tracing::debug!(tool = %call.name, preview = preview(&encoded), "tool result");
                ToolOutcome::Success(payload)
            }
            Err(e) => {
                let marker = e.marker();
                let classified = AgentError::from(e);
                tracing::warn!(tool = %call.name, elapsed_ms, error = %classified, "tool call failed");
                ToolOutcome::failure(marker)
            }
        };

        Step {
            tool: call.name.clone(),
            args: Value::Object(call.args.clone()),
            result: outcome,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::test_support::{call, StubTool};
    use serde_json::json;
    use std::time::Duration;

    fn dispatcher(tools: Vec<StubTool>, max_parallel: usize) -> ToolDispatcher {
        let mut registry = ToolRegistry::new();
        for t in tools {
            registry.register(Arc::new(t));
        }
        ToolDispatcher::new(Arc::new(registry), ToolsConfig::default(), max_parallel)
    }

    #[tokio::test]
    async fn single_call_records_success() {
        let d = dispatcher(vec![StubTool::new(ToolName::Weather)], 4);
        let step = d
            .dispatch_single(&call("weather", json!({"lat": 22.5, "lon": 88.3})))
            .await;
        assert_eq!(step.tool, "weather");
        assert_eq!(step.args, json!({"lat": 22.5, "lon": 88.3}));
        assert!(step.result.is_success());
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_step() {
        let d = dispatcher(vec![], 4);
        let step = d.dispatch_single(&call("pests", json!({}))).await;
        assert_eq!(step.result, ToolOutcome::failure("unknown_or_disabled_tool"));
    }

    #[tokio::test]
    async fn missing_name_becomes_error_step() {
        let d = dispatcher(vec![StubTool::new(ToolName::Weather)], 4);
        let step = d.dispatch_single(&call("", json!({}))).await;
        assert_eq!(step.tool, "");
        assert_eq!(step.result, ToolOutcome::failure("unknown_or_disabled_tool"));
    }

    #[tokio::test]
    async fn disabled_tool_becomes_error_step() {
        let d = dispatcher(vec![StubTool::new(ToolName::Satellite).disabled()], 4);
        let step = d
            .dispatch_single(&call("satellite", json!({"lat": 1.0, "lon": 2.0})))
            .await;
        assert_eq!(step.result, ToolOutcome::failure("unknown_or_disabled_tool"));
    }

    #[tokio::test]
    async fn validation_failure_is_data_not_panic() {
        let stub = StubTool::new(ToolName::Weather);
        let invocations = stub.invocations();
        let d = dispatcher(vec![stub], 4);
        let step = d.dispatch_single(&call("weather", json!({"lat": 22.5}))).await;
        match &step.result {
            ToolOutcome::Failure { error } => assert!(error.contains("missing required field: 'lon'")),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(invocations.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tool_failure_is_captured() {
        let d = dispatcher(vec![StubTool::new(ToolName::Soil).failing("HTTP 503")], 4);
        let step = d
            .dispatch_single(&call("soil", json!({"lat": 1.0, "lon": 2.0})))
            .await;
        match &step.result {
            ToolOutcome::Failure { error } => assert!(error.contains("HTTP 503")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let d = dispatcher(
            vec![StubTool::new(ToolName::Market).with_latency(Duration::from_secs(60))],
            4,
        );
        let step = d
            .dispatch_single(&call("market", json!({"district": "Kolkata"})))
            .await;
        assert_eq!(
            step.result,
            ToolOutcome::failure("tool call 'market' timed out after 12000ms")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn batch_preserves_call_order_under_reversed_latency() {
        let d = dispatcher(
            vec![
                StubTool::new(ToolName::Weather).with_latency(Duration::from_millis(300)),
                StubTool::new(ToolName::Soil).with_latency(Duration::from_millis(200)),
                StubTool::new(ToolName::Market).with_latency(Duration::from_millis(100)),
                StubTool::new(ToolName::Rag).with_latency(Duration::from_millis(10)),
            ],
            4,
        );
        let calls = vec![
            call("weather", json!({"lat": 1.0, "lon": 2.0})),
            call("soil", json!({"lat": 1.0, "lon": 2.0})),
            call("market", json!({"district": "Nadia"})),
            call("rag", json!({"query": "subsidy"})),
        ];
        let started = tokio::time::Instant::now();
        let steps = d.dispatch_batch(&calls).await;
        let names: Vec<&str> = steps.iter().map(|s| s.tool.as_str()).collect();
        assert_eq!(names, vec!["weather", "soil", "market", "rag"]);
        assert!(steps.iter().all(|s| s.result.is_success()));
        // ran concurrently: total is the slowest call, not the sum
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_never_exceeds_concurrency_limit() {
        let stub = StubTool::new(ToolName::Weather).with_latency(Duration::from_millis(50));
        let peak = stub.peak_in_flight();
        let invocations = stub.invocations();
        let d = dispatcher(vec![stub], 4);
        let calls: Vec<PlannedCall> = (0..10)
            .map(|i| call("weather", json!({"lat": i as f64, "lon": 0.0})))
            .collect();

        let steps = d.dispatch_batch(&calls).await;

        assert_eq!(steps.len(), 10);
        assert_eq!(invocations.load(std::sync::atomic::Ordering::SeqCst), 10);
        let peak = peak.load(std::sync::atomic::Ordering::SeqCst);
        assert!(peak <= 4, "peak in flight was {peak}");
        assert!(peak >= 2, "batch should run concurrently, peak was {peak}");
        for (i, step) in steps.iter().enumerate() {
            assert_eq!(step.args["lat"], json!(i as f64));
        }
    }

    #[tokio::test]
    async fn failing_call_does_not_affect_siblings() {
        let d = dispatcher(
            vec![
                StubTool::new(ToolName::Weather),
                StubTool::new(ToolName::Soil).failing("boom"),
            ],
            2,
        );
        let steps = d
            .dispatch_batch(&[
                call("soil", json!({"lat": 1.0, "lon": 2.0})),
                call("unknown", json!({})),
                call("weather", json!({"lat": 1.0, "lon": 2.0})),
            ])
            .await;
        assert_eq!(steps.len(), 3);
        assert!(!steps[0].result.is_success());
        assert!(!steps[1].result.is_success());
        assert!(steps[2].result.is_success());
    }

    #[tokio::test]
    async fn empty_batch_yields_no_steps() {
        let d = dispatcher(vec![], 4);
        assert!(d.dispatch_batch(&[]).await.is_empty());
    }
}
