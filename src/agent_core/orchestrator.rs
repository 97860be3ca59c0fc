//! Orchestrator — the plan / execute / finalize state machine.
//!
//! ```text
//! Planning ──final──────────────────────────────────────────▶ Done
//!    │ tool / tools                                            ▲
//!    ▼                                                         │
//! ToolExecuting ──replan, rounds left──▶ Planning             │
//!    │ default, or no rounds left                              │
//!    ▼                                                         │
//! Finalizing ─────────────────────ok───────────────────────────┘
//!    │ err
//!    ▼
//!  Error  (static apology + marker)
//! ```
//!
//! A planner failure (call or parse) salvages through `Finalizing` when the
//! step log is non-empty and ends in `Error` otherwise. Every run returns an
//! [`AgentOutcome`]; nothing is raised to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;
use uuid::Uuid;

use super::errors::AgentError;
use super::finalizer::Finalizer;
use super::plan_interpreter::{autofill, autofill_batch};
use super::plan_parser::{parse_decision, PlanDecision, PlannedCall};
use super::planner::Planner;
use super::retry::RetryPolicy;
use super::tool_router::ToolDispatcher;
use super::types::{AgentOutcome, AgentRequest, FarmPreferences, SessionState};
use crate::inference::{AgentSettings, LanguageModel, OrchestratorConfig};
use crate::tools::ToolRegistry;

// ─── Phases ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Phase {
    Planning,
    /// Calls from one decision; `batch` is false for a single `tool` decision.
    ToolExecuting { calls: Vec<PlannedCall>, batch: bool },
    Finalizing,
    Done { answer: String },
    Error { marker: String },
}

impl Phase {
    fn label(&self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::ToolExecuting { .. } => "tool_executing",
            Phase::Finalizing => "finalizing",
            Phase::Done { .. } => "done",
            Phase::Error { .. } => "error",
        }
    }
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Orchestrator {
    planner: Planner,
    finalizer: Finalizer,
    dispatcher: ToolDispatcher,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        planner: Planner,
        finalizer: Finalizer,
        dispatcher: ToolDispatcher,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            planner,
            finalizer,
            dispatcher,
            config,
        }
    }

    /// Wire planner, finalizer and dispatcher from settings.
    pub fn from_settings(
        settings: &AgentSettings,
        planner_model: Arc<dyn LanguageModel>,
        finalizer_model: Arc<dyn LanguageModel>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let orch = &settings.orchestrator;
        let planner = Planner::new(
            planner_model,
            settings.models.planner_params(orch.planner_timeout()),
        );
        let finalizer = Finalizer::new(
            finalizer_model,
            settings.models.finalizer_params(orch.finalizer_timeout()),
            RetryPolicy::linear(
                orch.finalizer_attempts,
                Duration::from_millis(orch.finalizer_backoff_ms),
            ),
        );
        let dispatcher = ToolDispatcher::new(
            registry,
            settings.tools.clone(),
            orch.max_parallel_tools,
        );
        Self::new(planner, finalizer, dispatcher, orch.clone())
    }

    pub fn finalizer(&self) -> &Finalizer {
        &self.finalizer
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Answer one request. Always returns an outcome.
    pub async fn run(&self, request: &AgentRequest, prefs: FarmPreferences) -> AgentOutcome {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("agent_run", %request_id);
        self.drive(request, prefs).instrument(span).await
    }

    async fn drive(&self, request: &AgentRequest, prefs: FarmPreferences) -> AgentOutcome {
        let start = Instant::now();
        let max_steps = request.max_steps.unwrap_or(self.config.max_steps);
        let mut state = SessionState::new(request, prefs, max_steps);
        let mut rounds: u32 = 0;

        tracing::info!(
            max_steps,
            replan_after_tools = self.config.replan_after_tools,
            question_len = request.question.len(),
            "agent run started"
        );

        let mut phase = if max_steps == 0 {
            Phase::Finalizing
        } else {
            Phase::Planning
        };

        loop {
            tracing::debug!(phase = phase.label(), round = rounds, "phase");
            phase = match phase {
                Phase::Planning => {
                    rounds += 1;
                    self.plan_round(&mut state, rounds).await
                }

                Phase::ToolExecuting { calls, batch } => {
                    self.execute_round(&mut state, &calls, batch).await;
                    if !self.config.replan_after_tools {
                        Phase::Finalizing
                    } else if rounds >= state.max_steps {
                        tracing::info!(rounds, "round limit reached, finalizing");
                        Phase::Finalizing
                    } else {
                        Phase::Planning
                    }
                }

                Phase::Finalizing => match self.finalizer.finalize(&state).await {
                    Ok(answer) => {
                        if let Some(previous) = state.error.take() {
                            tracing::info!(error = %previous, "salvaged answer after planner failure");
                        }
                        Phase::Done { answer }
                    }
                    Err(e) => Phase::Error {
                        marker: e.marker(),
                    },
                },

                Phase::Done { answer } => {
                    tracing::info!(
                        rounds,
                        steps = state.steps().len(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "agent run finished"
                    );
                    state.final_answer = Some(answer.clone());
                    return state.into_outcome(answer);
                }

                Phase::Error { marker } => {
                    tracing::warn!(
                        rounds,
                        steps = state.steps().len(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        error = %marker,
                        "agent run failed"
                    );
                    return AgentOutcome::apology(state.steps().to_vec(), marker);
                }
            };
        }
    }

    /// One planner call plus parse; returns the next phase.
    async fn plan_round(&self, state: &mut SessionState, round: u32) -> Phase {
        let decision = match self.planner.plan(state, self.dispatcher.registry()).await {
            Ok(text) => parse_decision(&text),
            Err(e) => return self.planner_failed(state, e),
        };

        match decision {
            PlanDecision::Final { answer } => {
                tracing::info!(round, decision = "final", "planner decided");
                Phase::Done { answer }
            }
            PlanDecision::Tool(call) => {
                tracing::info!(round, decision = "tool", tool = %call.name, "planner decided");
                Phase::ToolExecuting {
                    calls: vec![call],
                    batch: false,
                }
            }
            PlanDecision::Tools(calls) => {
                tracing::info!(round, decision = "tools", calls = calls.len(), "planner decided");
                Phase::ToolExecuting { calls, batch: true }
            }
            PlanDecision::Invalid { reason } => {
                self.planner_failed(state, AgentError::PlannerParse { reason })
            }
        }
    }

    /// Salvage through the finalizer when there is something to work with.
    fn planner_failed(&self, state: &mut SessionState, error: AgentError) -> Phase {
        let marker = error.marker();
        if state.steps().is_empty() {
            tracing::warn!(error = %error, "planner failed with no steps to salvage");
            return Phase::Error { marker };
        }
        tracing::warn!(
            error = %error,
            steps = state.steps().len(),
            "planner failed, finalizing from gathered steps"
        );
        state.error = Some(marker);
        Phase::Finalizing
    }

    async fn execute_round(&self, state: &mut SessionState, calls: &[PlannedCall], batch: bool) {
        if batch {
            let filled = autofill_batch(calls, &state.hints, &state.prefs);
            let steps = self.dispatcher.dispatch_batch(&filled).await;
            state.append_steps(steps);
        } else {
            for call in calls {
                let filled = autofill(call, &state.hints, &state.prefs);
                let step = self.dispatcher.dispatch_single(&filled).await;
                state.append_steps([step]);
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
