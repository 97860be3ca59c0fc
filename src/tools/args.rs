//! Tool names and typed argument schemas.
//!
//! The planner names tools with free-text strings; they are resolved here into
//! the closed [`ToolName`] enum and a validated [`ToolArgs`] before anything
//! runs. Unknown and extra fields are ignored, missing required fields are an
//! `InvalidArguments` error.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::errors::ToolError;

// ─── ToolName ────────────────────────────────────────────────────────────────

/// Every capability the planner may call.
///
/// Declaration order is catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolName {
    Weather,
    Soil,
    Market,
    Recos,
    Satellite,
    Rag,
}

impl ToolName {
    pub const ALL: [ToolName; 6] = [
        ToolName::Weather,
        ToolName::Soil,
        ToolName::Market,
        ToolName::Recos,
        ToolName::Satellite,
        ToolName::Rag,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::Weather => "weather",
            ToolName::Soil => "soil",
            ToolName::Market => "market",
            ToolName::Recos => "recos",
            ToolName::Satellite => "satellite",
            ToolName::Rag => "rag",
        }
    }

    /// One-line catalog description shown to the planner.
    pub fn description(self) -> &'static str {
        match self {
            ToolName::Weather => "Get current + 7-day forecast with rainfall (requires: lat, lon).",
            ToolName::Soil => "Get topsoil pH, SOC, N, texture (requires: lat, lon).",
            ToolName::Market => "Get current prices by district (optional: commodity, mandi).",
            ToolName::Recos => "Get top-3 crop recommendations (requires: lat, lon).",
            ToolName::Satellite => {
                "Get NDVI/NDMI/NDWI/LAI summary (requires: lat, lon; credentials needed)."
            }
            ToolName::Rag => {
                "Retrieve policy/guidelines or generic knowledge from local documents (query, k)."
            }
        }
    }

    /// Fields that must be present and non-null.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            ToolName::Weather | ToolName::Soil | ToolName::Recos | ToolName::Satellite => {
                &["lat", "lon"]
            }
            ToolName::Market => &["district"],
            ToolName::Rag => &["query"],
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ToolError::UnknownTool {
                name: s.to_string(),
            })
    }
}

// ─── Argument Schemas ────────────────────────────────────────────────────────

/// `{lat, lon}` for weather, soil, satellite and recos.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordArgs {
    #[serde(deserialize_with = "lenient_f64")]
    pub lat: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub lon: f64,
}

/// `{district, commodity?, mandi?}` for market prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketArgs {
    pub district: String,
    #[serde(default)]
    pub commodity: Option<String>,
    #[serde(default)]
    pub mandi: Option<String>,
}

/// `{query, k = 4}` for document retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagArgs {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: u32,
}

fn default_k() -> u32 {
    4
}

/// Upper bound on retrieved snippets.
const MAX_RAG_K: u32 = 20;

/// Validated arguments, one variant per tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArgs {
    Weather(CoordArgs),
    Soil(CoordArgs),
    Market(MarketArgs),
    Recos(CoordArgs),
    Satellite(CoordArgs),
    Rag(RagArgs),
}

impl ToolArgs {
    /// Validate an argument mapping against `tool`'s schema.
    pub fn parse(tool: ToolName, args: &Map<String, Value>) -> Result<Self, ToolError> {
        for field in tool.required_fields() {
            let present = args.get(*field).is_some_and(|v| !v.is_null());
            if !present {
                return Err(ToolError::InvalidArguments {
                    tool: tool.to_string(),
                    reason: format!("missing required field: '{field}'"),
                });
            }
        }

        let value = Value::Object(args.clone());
        let invalid = |e: serde_json::Error| ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: e.to_string(),
        };

        let parsed = match tool {
            ToolName::Weather => ToolArgs::Weather(serde_json::from_value(value).map_err(invalid)?),
            ToolName::Soil => ToolArgs::Soil(serde_json::from_value(value).map_err(invalid)?),
            ToolName::Recos => ToolArgs::Recos(serde_json::from_value(value).map_err(invalid)?),
            ToolName::Satellite => {
                ToolArgs::Satellite(serde_json::from_value(value).map_err(invalid)?)
            }
            ToolName::Market => ToolArgs::Market(serde_json::from_value(value).map_err(invalid)?),
            ToolName::Rag => {
                let mut rag: RagArgs = serde_json::from_value(value).map_err(invalid)?;
                rag.k = rag.k.clamp(1, MAX_RAG_K);
                ToolArgs::Rag(rag)
            }
        };

        parsed.check_ranges()?;
        Ok(parsed)
    }

    pub fn tool(&self) -> ToolName {
        match self {
            ToolArgs::Weather(_) => ToolName::Weather,
            ToolArgs::Soil(_) => ToolName::Soil,
            ToolArgs::Market(_) => ToolName::Market,
            ToolArgs::Recos(_) => ToolName::Recos,
            ToolArgs::Satellite(_) => ToolName::Satellite,
            ToolArgs::Rag(_) => ToolName::Rag,
        }
    }

    /// Coordinates, for the tools that take them.
    pub fn coords(&self) -> Option<CoordArgs> {
        match self {
            ToolArgs::Weather(c) | ToolArgs::Soil(c) | ToolArgs::Recos(c) | ToolArgs::Satellite(c) => {
                Some(*c)
            }
            ToolArgs::Market(_) | ToolArgs::Rag(_) => None,
        }
    }

    fn check_ranges(&self) -> Result<(), ToolError> {
        let Some(c) = self.coords() else {
            return Ok(());
        };
        let reason = if !(-90.0..=90.0).contains(&c.lat) {
            Some(format!("lat out of range: {}", c.lat))
        } else if !(-180.0..=180.0).contains(&c.lon) {
            Some(format!("lon out of range: {}", c.lon))
        } else {
            None
        };
        match reason {
            Some(reason) => Err(ToolError::InvalidArguments {
                tool: self.tool().to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Accept `22.5` as well as `"22.5"`; models emit both.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(f64),
        Str(String),
    }

    let value = match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => n,
        NumOrStr::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("expected a number, got '{s}'")))?,
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(serde::de::Error::custom("expected a finite number"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn tool_name_round_trips_case_insensitively() {
        assert_eq!("Weather".parse::<ToolName>().unwrap(), ToolName::Weather);
        assert_eq!(" rag ".parse::<ToolName>().unwrap(), ToolName::Rag);
        let err = "pests".parse::<ToolName>().unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { name } if name == "pests"));
    }

    #[test]
    fn coords_accept_numeric_strings_and_ignore_extras() {
        let args = ToolArgs::parse(
            ToolName::Weather,
            &map(json!({"lat": "22.5", "lon": 88.3, "units": "metric"})),
        )
        .unwrap();
        assert_eq!(
            args,
            ToolArgs::Weather(CoordArgs {
                lat: 22.5,
                lon: 88.3
            })
        );
    }

    #[test]
    fn missing_required_field_is_invalid_arguments() {
        let err = ToolArgs::parse(ToolName::Soil, &map(json!({"lat": 22.5}))).unwrap_err();
        match err {
            ToolError::InvalidArguments { tool, reason } => {
                assert_eq!(tool, "soil");
                assert_eq!(reason, "missing required field: 'lon'");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn null_required_field_counts_as_missing() {
        let err = ToolArgs::parse(ToolName::Market, &map(json!({"district": null}))).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn wrong_type_is_invalid_arguments() {
        let err =
            ToolArgs::parse(ToolName::Weather, &map(json!({"lat": "north", "lon": 1.0}))).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn out_of_range_coordinates_rejected() {
        let err =
            ToolArgs::parse(ToolName::Recos, &map(json!({"lat": 95.0, "lon": 1.0}))).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { reason, .. } if reason.contains("lat")));
    }

    #[test]
    fn market_optional_fields_default_to_none() {
        let args = ToolArgs::parse(ToolName::Market, &map(json!({"district": "Kolkata"}))).unwrap();
        match args {
            ToolArgs::Market(m) => {
                assert_eq!(m.district, "Kolkata");
                assert!(m.commodity.is_none());
                assert!(m.mandi.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rag_k_defaults_and_clamps() {
        let args = ToolArgs::parse(ToolName::Rag, &map(json!({"query": "PM-KISAN"}))).unwrap();
        assert!(matches!(args, ToolArgs::Rag(RagArgs { k: 4, .. })));
        let args =
            ToolArgs::parse(ToolName::Rag, &map(json!({"query": "x", "k": 500}))).unwrap();
        assert!(matches!(args, ToolArgs::Rag(RagArgs { k: MAX_RAG_K, .. })));
    }
}
