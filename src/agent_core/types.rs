//! Shared types for the agent core.
//!
//! Request hints, farm preferences, the step log and the outcome returned to
//! callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Answer returned when nothing better can be produced.
pub const APOLOGY: &str = "Sorry, I couldn't complete the task.";

/// Upper bound on preferred commodities carried into a session.
pub const MAX_PREFERRED_COMMODITIES: usize = 8;

/// Preferred commodities shown to the planner.
pub const PROMPT_PREFERRED_COMMODITIES: usize = 5;

// ─── Request ────────────────────────────────────────────────────────────────

/// Optional situational hints supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationHints {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub commodity: Option<String>,
    #[serde(default)]
    pub mandi: Option<String>,
}

impl LocationHints {
    /// Both coordinates, or nothing.
    pub fn coords(&self) -> Option<(f64, f64)> {
        self.lat.zip(self.lon)
    }

    /// District, if present and not blank.
    pub fn district(&self) -> Option<&str> {
        self.district.as_deref().map(str::trim).filter(|d| !d.is_empty())
    }
}

/// Farmer-specific defaults from the farm profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FarmPreferences {
    #[serde(default)]
    pub preferred_commodities: Vec<String>,
    #[serde(default)]
    pub preferred_mandi: Option<String>,
}

impl FarmPreferences {
    /// Trim, drop blanks and keep at most [`MAX_PREFERRED_COMMODITIES`].
    pub fn new(commodities: Vec<String>, mandi: Option<String>) -> Self {
        let preferred_commodities = commodities
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .take(MAX_PREFERRED_COMMODITIES)
            .collect();
        let preferred_mandi = mandi
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        Self {
            preferred_commodities,
            preferred_mandi,
        }
    }

    pub fn first_commodity(&self) -> Option<&str> {
        self.preferred_commodities.first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.preferred_commodities.is_empty() && self.preferred_mandi.is_none()
    }
}

/// Top-level question plus context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub question: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default)]
    pub hints: LocationHints,
    /// Farm whose preferences should be loaded.
    #[serde(default)]
    pub farm_id: Option<String>,
    /// Overrides the configured round limit.
    #[serde(default)]
    pub max_steps: Option<u32>,
}

fn default_lang() -> String {
    "en".to_string()
}

impl AgentRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            lang: default_lang(),
            hints: LocationHints::default(),
            farm_id: None,
            max_steps: None,
        }
    }
}

// ─── Steps ──────────────────────────────────────────────────────────────────

/// What a tool call produced: its payload, or an `{error}` marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutcome {
    Failure { error: String },
    Success(Value),
}

impl ToolOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        ToolOutcome::Failure {
            error: reason.into(),
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            ToolOutcome::Success(v) => Some(v),
            ToolOutcome::Failure { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }
}

/// One recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Name as the planner gave it (may be unknown).
    pub tool: String,
    /// Arguments after auto-fill.
    pub args: Value,
    pub result: ToolOutcome,
}

// ─── Session ────────────────────────────────────────────────────────────────

/// Per-request state, owned by one orchestrator run.
///
/// The step log is append-only.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub question: String,
    pub lang: String,
    pub hints: LocationHints,
    pub prefs: FarmPreferences,
    pub max_steps: u32,
    steps: Vec<Step>,
    pub final_answer: Option<String>,
    pub error: Option<String>,
}

impl SessionState {
    /// Preferences are re-normalised here; callers may build them by hand.
    pub fn new(request: &AgentRequest, prefs: FarmPreferences, max_steps: u32) -> Self {
        Self {
            question: request.question.clone(),
            lang: request.lang.clone(),
            hints: request.hints.clone(),
            prefs: FarmPreferences::new(prefs.preferred_commodities, prefs.preferred_mandi),
            max_steps,
            steps: Vec::new(),
            final_answer: None,
            error: None,
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn append_steps(&mut self, steps: impl IntoIterator<Item = Step>) {
        self.steps.extend(steps);
    }

    /// Terminal result with the given answer.
    pub fn into_outcome(self, answer: String) -> AgentOutcome {
        AgentOutcome {
            answer,
            steps: self.steps,
            error: self.error,
        }
    }
}

// ─── Outcome ────────────────────────────────────────────────────────────────

/// What every orchestrator run returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub answer: String,
    pub steps: Vec<Step>,
    pub error: Option<String>,
}

impl AgentOutcome {
    /// Static apology with a diagnostic marker.
    pub fn apology(steps: Vec<Step>, error: String) -> Self {
        Self {
            answer: APOLOGY.to_string(),
            steps,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
