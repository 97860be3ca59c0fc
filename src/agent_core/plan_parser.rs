//! Planner output parser.
//!
//! The planner is asked for strict JSON but models wrap it in prose, code
//! fences or commentary. Extraction order:
//! 1. a ```` ```json ```` fenced block holding one object
//! 2. a left-to-right brace scan: from each `{`, track nesting (ignoring
//!    braces inside string literals) to the matching `}` and try to parse;
//!    on failure resume from the next `{`
//!
//! The extracted object is then matched against the three decision shapes.
//! Parsing never fails outright; anything unusable becomes
//! [`PlanDecision::Invalid`].

use serde_json::{Map, Value};

// ─── Types ──────────────────────────────────────────────────────────────────

/// One tool call requested by the planner, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCall {
    /// Raw tool name; may be empty or unknown.
    pub name: String,
    pub args: Map<String, Value>,
}

/// The planner's decision for one round.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanDecision {
    Final { answer: String },
    Tool(PlannedCall),
    Tools(Vec<PlannedCall>),
    Invalid { reason: String },
}

impl PlanDecision {
    fn invalid(reason: impl Into<String>) -> Self {
        PlanDecision::Invalid {
            reason: reason.into(),
        }
    }
}

// ─── Entry Point ────────────────────────────────────────────────────────────

/// Parse raw planner text into a decision.
pub fn parse_decision(text: &str) -> PlanDecision {
    match extract_json_object(text) {
        Ok(obj) => decision_from_object(&obj),
        Err(reason) => PlanDecision::invalid(reason),
    }
}

// ─── JSON Extraction ────────────────────────────────────────────────────────

/// Find the first JSON object in `text`.
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>, String> {
    if let Some(obj) = fenced_json(text) {
        return Ok(obj);
    }

    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = matching_brace(text, start) {
            if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Ok(obj);
            }
        }
        search_from = start + 1;
    }

    Err("no JSON object found".to_string())
}

/// Body of a ```` ```json ```` fence, if it parses to an object.
fn fenced_json(text: &str) -> Option<Map<String, Value>> {
    let lower = text.to_ascii_lowercase();
    let mut search_from = 0;
    while let Some(offset) = lower[search_from..].find("```json") {
        let body_start = search_from + offset + "```json".len();
        let body_end = text[body_start..]
            .find("```")
            .map(|i| body_start + i)
            .unwrap_or(text.len());
        let body = text[body_start..body_end].trim();
        if body.starts_with('{') {
            if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(body) {
                return Some(obj);
            }
        }
        search_from = body_end;
        if search_from >= text.len() {
            break;
        }
    }
    None
}

/// Byte index of the `}` closing the `{` at `start`.
///
/// Braces inside JSON string literals are ignored. Returns `None` if the text
/// ends first.
fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }
    None
}

// ─── Shape Matching ─────────────────────────────────────────────────────────

fn decision_from_object(obj: &Map<String, Value>) -> PlanDecision {
    let action = obj
        .get("action")
        .and_then(Value::as_str)
        .map(|a| a.trim().to_ascii_lowercase());

    match action.as_deref() {
        Some("final") => match obj.get("answer").and_then(Value::as_str) {
            Some(answer) if !answer.trim().is_empty() => PlanDecision::Final {
                answer: answer.trim().to_string(),
            },
            _ => PlanDecision::invalid("final decision without an answer"),
        },
        Some("tool") => {
            let call = planned_call(obj);
            if call.name.is_empty() {
                PlanDecision::invalid("tool decision without a name")
            } else {
                PlanDecision::Tool(call)
            }
        }
        Some("tools") => {
            let calls: Vec<PlannedCall> = obj
                .get("calls")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .map(|c| c.as_object().map(planned_call).unwrap_or_else(empty_call))
                        .collect()
                })
                .unwrap_or_default();
            if calls.is_empty() {
                PlanDecision::invalid("tools decision without calls")
            } else {
                PlanDecision::Tools(calls)
            }
        }
        Some(other) => PlanDecision::invalid(format!("unknown action '{other}'")),
        None => PlanDecision::invalid("missing action"),
    }
}

fn empty_call() -> PlannedCall {
    PlannedCall {
        name: String::new(),
        args: Map::new(),
    }
}

/// `{name, args}`; `args` may also arrive as a JSON-encoded string.
fn planned_call(obj: &Map<String, Value>) -> PlannedCall {
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(|n| n.trim().to_string())
        .unwrap_or_default();

    let args = match obj.get("args") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    };

    PlannedCall { name, args }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
