//! Planner — asks the model for the next action.
//!
//! Builds a prompt from the question, the session's context hints and the
//! catalog of enabled tools, and returns the model's raw text. Parsing is the
//! parser's job.

use std::sync::Arc;

use super::errors::AgentError;
use super::tokens::estimate_tokens;
use super::types::{SessionState, PROMPT_PREFERRED_COMMODITIES};
use crate::inference::{GenerationParams, LanguageModel};
use crate::tools::{ToolName, ToolRegistry};

/// Planning model plus its call parameters.
#[derive(Clone)]
pub struct Planner {
    model: Arc<dyn LanguageModel>,
    params: GenerationParams,
}

impl Planner {
    pub fn new(model: Arc<dyn LanguageModel>, params: GenerationParams) -> Self {
        Self { model, params }
    }

    /// One planning call, bounded by the planner timeout.
    pub async fn plan(
        &self,
        state: &SessionState,
        registry: &ToolRegistry,
    ) -> Result<String, AgentError> {
        let prompt = build_prompt(state, registry);
        tracing::debug!(
            prompt_tokens = estimate_tokens(&prompt),
            steps_so_far = state.steps().len(),
            "calling planner"
        );

        match tokio::time::timeout(self.params.timeout, self.model.generate(&prompt, &self.params))
            .await
        {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(AgentError::planner_call(&e)),
            Err(_) => Err(AgentError::PlannerCall {
                reason: format!(
                    "inference timeout after {}ms",
                    self.params.timeout.as_millis()
                ),
            }),
        }
    }
}

/// `coords=(..)`, `district=..` etc., only for hints that are present.
pub fn context_hints(state: &SessionState) -> String {
    let mut hints = Vec::new();
    if let Some((lat, lon)) = state.hints.coords() {
        hints.push(format!("coords=({lat},{lon})"));
    }
    if let Some(d) = state.hints.district() {
        hints.push(format!("district={d}"));
    }
    if let Some(c) = state.hints.commodity.as_deref().filter(|c| !c.trim().is_empty()) {
        hints.push(format!("commodity={c}"));
    }
    if let Some(m) = state.hints.mandi.as_deref().filter(|m| !m.trim().is_empty()) {
        hints.push(format!("mandi={m}"));
    }
    if !state.prefs.preferred_commodities.is_empty() {
        let shown: Vec<&str> = state
            .prefs
            .preferred_commodities
            .iter()
            .take(PROMPT_PREFERRED_COMMODITIES)
            .map(String::as_str)
            .collect();
        hints.push(format!("preferred=[{}]", shown.join(", ")));
    }
    if let Some(m) = &state.prefs.preferred_mandi {
        hints.push(format!("default_mandi={m}"));
    }

    if hints.is_empty() {
        "none".to_string()
    } else {
        hints.join(", ")
    }
}

pub fn build_prompt(state: &SessionState, registry: &ToolRegistry) -> String {
    let names: Vec<&str> = registry
        .enabled_names()
        .into_iter()
        .map(ToolName::as_str)
        .collect();

    format!(
        r#"You are KrishiMitra, a farm advisor agent.
Question: {question}
Context hints: {hints}

Available tools (choose only if useful):
{catalog}

Return STRICT JSON ONLY as ONE of:
{{"action":"final","answer":"..."}}
or
{{"action":"tool","name":"{names}","args":{{...}}}}
or
{{"action":"tools","calls":[{{"name":"weather","args":{{"lat":...,"lon":...}}}}, ...]}}

Guidelines:
- Prefer the farmer's preferred commodities and default mandi when using market prices.
- Use lat/lon for weather/soil/recos/satellite; district (+optional mandi) for market.
- Keep the toolset minimal; avoid redundant calls.
- If earlier tool results already answer the question, return the final action.
{previous}JSON only, no explanations.
"#,
        question = state.question,
        hints = context_hints(state),
        catalog = registry.catalog(),
        names = names.join("|"),
        previous = previous_results(state),
    )
}

/// Compact listing of the tools already run, so later rounds can stop.
fn previous_results(state: &SessionState) -> String {
    if state.steps().is_empty() {
        return String::new();
    }
    let lines: Vec<String> = state
        .steps()
        .iter()
        .map(|s| {
            let status = if s.result.is_success() { "ok" } else { "failed" };
            format!("- {} {} -> {status}", s.tool, s.args)
        })
        .collect();
    format!(
        "\nTools already run this session:\n{}\nDigest: {}\n\n",
        lines.join("\n"),
        super::finalizer::summarize_steps(state.steps())
    )
}
