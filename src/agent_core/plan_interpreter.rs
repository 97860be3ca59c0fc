//! Argument auto-fill from session context.
//!
//! Market calls are completed before dispatch: an omitted `district` takes the
//! session's district hint, an omitted `mandi` the farmer's preferred mandi,
//! and an omitted `commodity` the first preferred commodity. "Omitted" means
//! absent or null; an empty commodity string also counts.
//!
//! Every market call in a batch is filled independently, so several calls
//! without a commodity all get the same first preference. That is logged
//! rather than corrected.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::plan_parser::PlannedCall;
use super::types::{FarmPreferences, LocationHints};
use crate::tools::ToolName;

fn is_omitted(args: &Map<String, Value>, key: &str) -> bool {
    args.get(key).map_or(true, Value::is_null)
}

fn is_market(name: &str) -> bool {
    name.parse::<ToolName>().is_ok_and(|t| t == ToolName::Market)
}

/// Apply market defaults to one call. Non-market calls pass through unchanged.
pub fn autofill(call: &PlannedCall, hints: &LocationHints, prefs: &FarmPreferences) -> PlannedCall {
    if !is_market(&call.name) {
        return call.clone();
    }

    let mut args = call.args.clone();

    if is_omitted(&args, "district") {
        if let Some(district) = hints.district() {
            args.insert("district".into(), Value::String(district.to_string()));
        }
    }
    if is_omitted(&args, "mandi") {
        if let Some(mandi) = &prefs.preferred_mandi {
            args.insert("mandi".into(), Value::String(mandi.clone()));
        }
    }
    let commodity_omitted = is_omitted(&args, "commodity")
        || args
            .get("commodity")
            .and_then(Value::as_str)
            .is_some_and(|c| c.trim().is_empty());
    if commodity_omitted {
        if let Some(first) = prefs.first_commodity() {
            args.insert("commodity".into(), Value::String(first.to_string()));
        }
    }

    PlannedCall {
        name: call.name.clone(),
        args,
    }
}

/// Auto-fill every call of a batch, warning when market calls collapse into
/// identical requests.
pub fn autofill_batch(
    calls: &[PlannedCall],
    hints: &LocationHints,
    prefs: &FarmPreferences,
) -> Vec<PlannedCall> {
    let filled: Vec<PlannedCall> = calls.iter().map(|c| autofill(c, hints, prefs)).collect();

    let mut seen = HashSet::new();
    let duplicates = filled
        .iter()
        .filter(|c| is_market(&c.name))
        .filter(|c| !seen.insert(Value::Object(c.args.clone()).to_string()))
        .count();
    if duplicates > 0 {
        tracing::warn!(
            duplicates,
            commodity = prefs.first_commodity().unwrap_or(""),
            "batch contains identical market requests after commodity auto-fill"
        );
    }

    filled
}
