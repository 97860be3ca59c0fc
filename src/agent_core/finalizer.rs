//! Finalizer — turns the step log into the user-facing answer.
//!
//! Tool payloads are condensed into a short plain-text digest (one part per
//! step, joined with `"; "`) which is handed to the model together with the
//! original question.

use std::sync::Arc;

use serde_json::Value;

use super::errors::AgentError;
use super::retry::{retry, RetryPolicy};
use super::tokens::{ellipsize, estimate_tokens};
use super::types::{SessionState, Step, ToolOutcome};
use crate::inference::{GenerationParams, InferenceError, LanguageModel};
use crate::tools::ToolName;

/// Digest used when no step contributed anything.
pub const EMPTY_DIGEST: &str = "no tool data";

/// Rows of a list payload mentioned in the digest.
const DIGEST_ROWS: usize = 3;

/// Longest error text carried into the digest.
const DIGEST_ERROR_CHARS: usize = 120;

// ─── Finalizer ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Finalizer {
    model: Arc<dyn LanguageModel>,
    params: GenerationParams,
    policy: RetryPolicy,
}

impl Finalizer {
    pub fn new(model: Arc<dyn LanguageModel>, params: GenerationParams, policy: RetryPolicy) -> Self {
        Self {
            model,
            params,
            policy,
        }
    }

    /// Same model and sampling, one attempt bounded by `timeout`.
    pub fn single_call(&self, timeout: std::time::Duration) -> Self {
        let mut f = self.clone();
        f.params.timeout = timeout;
        f.policy = RetryPolicy::once();
        f
    }

    /// Synthesize an answer from the session's steps.
    pub async fn finalize(&self, state: &SessionState) -> Result<String, AgentError> {
        if state.steps().is_empty() {
            return Err(AgentError::NoSteps);
        }
        let digest = summarize_steps(state.steps());
        self.synthesize(&state.question, &state.lang, &digest).await
    }

    /// One answer from an already-built digest, retried per the policy.
    pub async fn synthesize(
        &self,
        question: &str,
        lang: &str,
        digest: &str,
    ) -> Result<String, AgentError> {
        let prompt = build_prompt(question, lang, digest);
        tracing::debug!(
            prompt_tokens = estimate_tokens(&prompt),
            digest_len = digest.len(),
            "calling finalizer"
        );

        let answer = retry(&self.policy, "finalize", |_attempt| self.generate_once(&prompt))
            .await
            .map_err(|e| AgentError::finalize(&e))?;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(AgentError::Finalize {
                reason: "empty answer".into(),
            });
        }
        Ok(answer.to_string())
    }

    async fn generate_once(&self, prompt: &str) -> Result<String, InferenceError> {
        tokio::time::timeout(self.params.timeout, self.model.generate(prompt, &self.params))
            .await
            .unwrap_or_else(|_| {
                Err(InferenceError::Timeout {
                    duration_ms: self.params.timeout.as_millis() as u64,
                })
            })
    }
}

pub fn build_prompt(question: &str, lang: &str, digest: &str) -> String {
    format!(
        "You are KrishiMitra. The user asked: {question}\n\
         Use these tool results: {digest}\n\
         Answer concisely in {lang}. If some data is missing, state assumptions briefly."
    )
}

// ─── Digest ─────────────────────────────────────────────────────────────────

/// Condense tool payloads into prompt context.
///
/// Failed steps are noted so the model can say what is missing; steps whose
/// payload carries nothing useful are skipped.
pub fn summarize_steps(steps: &[Step]) -> String {
    let parts: Vec<String> = steps.iter().filter_map(summarize_step).collect();
    if parts.is_empty() {
        EMPTY_DIGEST.to_string()
    } else {
        parts.join("; ")
    }
}

fn summarize_step(step: &Step) -> Option<String> {
    let label = if step.tool.is_empty() { "unnamed tool" } else { step.tool.as_str() };
    let payload = match &step.result {
        ToolOutcome::Failure { error } => {
            return Some(format!(
                "{label} unavailable ({})",
                ellipsize(error, DIGEST_ERROR_CHARS)
            ))
        }
        ToolOutcome::Success(v) => v,
    };

    match step.tool.parse::<ToolName>().ok()? {
        ToolName::Weather => Some(weather_digest(payload)),
        ToolName::Soil => Some(soil_digest(payload)),
        ToolName::Market => market_digest(payload),
        ToolName::Recos => recos_digest(payload),
        ToolName::Satellite => Some("Satellite indices fetched".to_string()),
        ToolName::Rag => rag_digest(payload),
    }
}

/// Number or string at `key`, else `N/A`.
fn num(v: &Value, key: &str) -> String {
    match v.get(key) {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => "N/A".to_string(),
    }
}

fn rows(payload: &Value) -> &[Value] {
    payload.as_array().map(Vec::as_slice).unwrap_or(&[])
}

fn weather_digest(payload: &Value) -> String {
    let current = payload.get("current").unwrap_or(&Value::Null);
    let mut lines = vec![format!(
        "Weather Now: {}°C, {}% RH, {}mm rain, {} m/s wind.",
        num(current, "temperature_c"),
        num(current, "humidity_pct"),
        num(current, "rain_mm"),
        num(current, "wind_speed_ms"),
    )];

    if payload.get("next24h_total_rain_mm").is_some_and(|v| !v.is_null()) {
        lines.push(format!(
            "Total rainfall expected (next 24h): {}mm",
            num(payload, "next24h_total_rain_mm")
        ));
    }

    let daily = payload
        .get("daily")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    if !daily.is_empty() {
        lines.push("\n--- 7-Day Forecast ---".to_string());
        for (i, day) in daily.iter().enumerate() {
            let date = num(day, "date");
            let label = if i == 0 { format!("Today ({date})") } else { date };
            lines.push(format!(
                "{label}:\n  - Temp: {}°C (Hi) / {}°C (Lo)\n  - Rain: {}mm ({}% chance)\n  - Total Precip: {}mm\n  - Avg Humidity: {}%",
                num(day, "tmax_c"),
                num(day, "tmin_c"),
                num(day, "rain_mm"),
                num(day, "rain_chance_pct"),
                num(day, "precip_mm"),
                num(day, "humidity_mean_pct"),
            ));
        }
    }
    lines.join("\n")
}

fn soil_digest(payload: &Value) -> String {
    let top = payload.get("topsoil").unwrap_or(&Value::Null);
    format!(
        "Soil pH {}, SOC {} g/kg, N {} g/kg",
        num(top, "ph_h2o"),
        num(top, "soc_g_per_kg"),
        num(top, "nitrogen_g_per_kg"),
    )
}

/// Prices are per quintal upstream; the digest quotes per kg.
fn market_digest(payload: &Value) -> Option<String> {
    let rows = rows(payload);
    if rows.is_empty() {
        return None;
    }
    let items: Vec<String> = rows
        .iter()
        .take(DIGEST_ROWS)
        .map(|r| {
            let commodity = r.get("commodity").and_then(Value::as_str).unwrap_or("Unknown");
            match r.get("price").and_then(Value::as_f64) {
                Some(p) => format!("{commodity} ₹{} per kg", p / 100.0),
                None => format!("{commodity} price N/A"),
            }
        })
        .collect();
    Some(format!("Market {}", items.join(", ")))
}

fn recos_digest(payload: &Value) -> Option<String> {
    let rows = rows(payload);
    if rows.is_empty() {
        return None;
    }
    let items: Vec<String> = rows
        .iter()
        .map(|r| {
            let crop = r.get("crop").and_then(Value::as_str).unwrap_or("Unknown");
            let prob = r.get("probability").and_then(Value::as_f64).unwrap_or(0.0);
            format!("{crop} {:.0}%", prob * 100.0)
        })
        .collect();
    Some(format!("Top crops {}", items.join(", ")))
}

fn rag_digest(payload: &Value) -> Option<String> {
    let titles: Vec<&str> = rows(payload)
        .iter()
        .take(DIGEST_ROWS)
        .filter_map(|h| {
            ["title", "source"]
                .iter()
                .find_map(|k| h.get(*k).and_then(Value::as_str).filter(|s| !s.is_empty()))
        })
        .collect();
    if titles.is_empty() {
        None
    } else {
        Some(format!("RAG: {}", titles.join(", ")))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
