//! Fixed fan-out workflow: query every data source at once, answer once.
//!
//! No planning and no iteration. Each source whose inputs are present is
//! called concurrently (coordinates for weather, soil, recos and satellite;
//! a district for market). A failed source leaves its slot empty. One
//! finalizer call then synthesizes an answer from whatever succeeded.

use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::finalizer::{summarize_steps, Finalizer};
use super::plan_parser::PlannedCall;
use super::tool_router::ToolDispatcher;
use super::types::{AgentRequest, Step, APOLOGY};
use crate::tools::ToolName;

/// Sources queried, in digest order.
const SOURCES: [ToolName; 5] = [
    ToolName::Weather,
    ToolName::Soil,
    ToolName::Market,
    ToolName::Recos,
    ToolName::Satellite,
];

/// Which sources contributed to the answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourcesUsed {
    pub weather: bool,
    pub soil: bool,
    pub market: bool,
    pub recos: bool,
    pub satellite: bool,
}

impl SourcesUsed {
    fn mark(&mut self, tool: ToolName) {
        match tool {
            ToolName::Weather => self.weather = true,
            ToolName::Soil => self.soil = true,
            ToolName::Market => self.market = true,
            ToolName::Recos => self.recos = true,
            ToolName::Satellite => self.satellite = true,
            ToolName::Rag => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatherOutcome {
    pub answer: String,
    pub sources: SourcesUsed,
    /// Successful source payloads only.
    pub steps: Vec<Step>,
    pub error: Option<String>,
}

pub struct GatherWorkflow {
    dispatcher: ToolDispatcher,
    finalizer: Finalizer,
}

impl GatherWorkflow {
    /// `finalizer` is used for exactly one attempt bounded by `timeout`.
    pub fn new(dispatcher: ToolDispatcher, finalizer: &Finalizer, timeout: Duration) -> Self {
        Self {
            dispatcher,
            finalizer: finalizer.single_call(timeout),
        }
    }

    pub async fn run(&self, request: &AgentRequest) -> GatherOutcome {
        let start = Instant::now();
        let calls = self.planned_calls(request);
        tracing::info!(sources = calls.len(), "gathering all sources");

        let results = join_all(calls.iter().map(|c| self.dispatcher.dispatch_single(c))).await;

        let mut sources = SourcesUsed::default();
        let mut steps = Vec::with_capacity(results.len());
        for step in results {
            if !step.result.is_success() {
                continue;
            }
            if let Ok(tool) = step.tool.parse::<ToolName>() {
                sources.mark(tool);
            }
            steps.push(step);
        }

        let digest = summarize_steps(&steps);
        let outcome = match self
            .finalizer
            .synthesize(&request.question, &request.lang, &digest)
            .await
        {
            Ok(answer) => GatherOutcome {
                answer,
                sources,
                steps,
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "gather synthesis failed");
                GatherOutcome {
                    answer: APOLOGY.to_string(),
                    sources,
                    steps,
                    error: Some(format!("llm_failed: {e}")),
                }
            }
        };

        tracing::info!(
            ?sources,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = outcome.error.is_none(),
            "gather finished"
        );
        outcome
    }

    /// One call per available source whose inputs are present.
    fn planned_calls(&self, request: &AgentRequest) -> Vec<PlannedCall> {
        let hints = &request.hints;
        SOURCES
            .iter()
            .filter(|t| self.dispatcher.registry().is_available(**t))
            .filter_map(|&tool| {
                let args = match tool {
                    ToolName::Market => {
                        let district = hints.district()?;
                        let mut args = json!({ "district": district });
                        if let Some(c) = hints.commodity.as_deref().filter(|c| !c.trim().is_empty()) {
                            args["commodity"] = json!(c);
                        }
                        if let Some(m) = hints.mandi.as_deref().filter(|m| !m.trim().is_empty()) {
                            args["mandi"] = json!(m);
                        }
                        args
                    }
                    _ => {
                        let (lat, lon) = hints.coords()?;
                        json!({ "lat": lat, "lon": lon })
                    }
                };
                Some(PlannedCall {
                    name: tool.as_str().to_string(),
                    args: match args {
                        Value::Object(map) => map,
                        _ => Map::new(),
                    },
                })
            })
            .collect()
    }
}
