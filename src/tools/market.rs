//! Market-price capability backed by the data.gov.in Agmarknet resource.

use std::cmp::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client as HttpClient;
use serde::Serialize;
use serde_json::Value;

use super::args::{MarketArgs, ToolArgs, ToolName};
use super::errors::ToolError;
use super::http::{as_f64, build_client, get_json};
use super::registry::ToolCapability;
use crate::inference::config::MarketToolConfig;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];

/// One normalized Agmarknet row. Prices are per `unit` (usually quintal).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketPrice {
    pub commodity: String,
    pub unit: String,
    pub price: Option<f64>,
    pub mandi: String,
    pub district: String,
    pub state: String,
    #[serde(rename = "lastUpdated")]
    pub last_updated: String,
}

impl MarketPrice {
    pub fn date(&self) -> Option<NaiveDate> {
        parse_date(&self.last_updated)
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

// ─── Normalization ───────────────────────────────────────────────────────────

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// First of `keys` present in `row`, trying each in as-is, lower, upper and
/// title case.
fn field<'a>(row: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| {
        [
            k.to_string(),
            k.to_lowercase(),
            k.to_uppercase(),
            title_case(k),
        ]
        .iter()
        .find_map(|candidate| row.get(candidate.as_str()))
    })
}

fn text(row: &Value, keys: &[&str]) -> String {
    match field(row, keys) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn or_default(s: String, default: &str) -> String {
    if s.is_empty() {
        default.to_string()
    } else {
        s
    }
}

/// Most recent first, then commodity, then mandi; all descending.
fn compare_rows(a: &MarketPrice, b: &MarketPrice) -> Ordering {
    let key = |p: &MarketPrice| {
        (
            p.date().unwrap_or(NaiveDate::MIN),
            p.commodity.to_lowercase(),
            p.mandi.to_lowercase(),
        )
    };
    key(b).cmp(&key(a))
}

/// Normalize and sort Agmarknet-like rows.
pub fn normalize_rows(rows: &[Value]) -> Vec<MarketPrice> {
    let mut out: Vec<MarketPrice> = rows
        .iter()
        .filter(|r| r.is_object())
        .map(|r| MarketPrice {
            commodity: or_default(text(r, &["commodity"]), "Unknown"),
            unit: or_default(text(r, &["unit"]), "Quintal"),
            price: as_f64(field(r, &["modal_price", "price"])),
            mandi: or_default(text(r, &["market", "mandi"]), "Unknown"),
            district: text(r, &["district"]),
            state: text(r, &["state"]),
            last_updated: text(r, &["arrival_date", "date"]),
        })
        .collect();
    out.sort_by(compare_rows);
    out
}

/// Rows from either `{"records": [...]}` or a bare array.
fn records(payload: &Value) -> &[Value] {
    payload
        .get("records")
        .and_then(Value::as_array)
        .or_else(|| payload.as_array())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

// ─── Capability ──────────────────────────────────────────────────────────────

/// Agmarknet price client.
pub struct AgmarknetMarket {
    http: HttpClient,
    config: MarketToolConfig,
}

impl AgmarknetMarket {
    pub fn new(config: MarketToolConfig) -> Result<Self, ToolError> {
        let http = build_client(ToolName::Market, Duration::from_secs(config.timeout_secs.max(1)))?;
        Ok(Self { http, config })
    }

    /// Latest prices, with only the provided filters sent upstream.
    pub async fn prices(&self, args: &MarketArgs) -> Result<Vec<MarketPrice>, ToolError> {
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.resource_id
        );
        let mut query: Vec<(&str, String)> = vec![
            ("format", "json".to_string()),
            ("limit", self.config.fetch_limit.to_string()),
            ("api-key", self.config.api_key.clone().unwrap_or_default()),
        ];
        if let Some(d) = non_empty(Some(&args.district)) {
            query.push(("filters[district]", d.to_string()));
        }
        if let Some(c) = non_empty(args.commodity.as_deref()) {
            query.push(("filters[commodity]", c.to_string()));
        }
        if let Some(m) = non_empty(args.mandi.as_deref()) {
            query.push(("filters[market]", m.to_string()));
        }

        let payload = get_json(ToolName::Market, self.http.get(url).query(&query)).await?;
        let mut rows = normalize_rows(records(&payload));
        rows.truncate(self.config.max_rows);
        tracing::debug!(district = %args.district, rows = rows.len(), "market prices fetched");
        Ok(rows)
    }
}

#[async_trait]
impl ToolCapability for AgmarknetMarket {
    fn name(&self) -> ToolName {
        ToolName::Market
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let ToolArgs::Market(market) = args else {
            return Err(ToolError::InvalidArguments {
                tool: ToolName::Market.to_string(),
                reason: "expected market arguments".into(),
            });
        };
        let rows = self.prices(&market).await?;
        serde_json::to_value(rows).map_err(|e| ToolError::Upstream {
            tool: ToolName::Market.to_string(),
            reason: format!("failed to encode prices: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_all_supported_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 10, 9);
        assert_eq!(parse_date("2025-10-09"), expected);
        assert_eq!(parse_date("09/10/2025"), expected);
        assert_eq!(parse_date(" 2025/10/09 "), expected);
        assert_eq!(parse_date("Oct 9"), None);
    }

    #[test]
    fn field_lookup_is_case_tolerant() {
        let row = json!({"Commodity": "Rice", "MARKET": "Azadpur", "Modal_Price": "3100"});
        let rows = normalize_rows(&[row]);
        assert_eq!(rows[0].commodity, "Rice");
        assert_eq!(rows[0].mandi, "Azadpur");
        assert_eq!(rows[0].price, Some(3100.0));
    }

    #[test]
    fn missing_fields_get_defaults() {
        let rows = normalize_rows(&[json!({"modal_price": "n/a"})]);
        let row = &rows[0];
        assert_eq!(row.commodity, "Unknown");
        assert_eq!(row.unit, "Quintal");
        assert_eq!(row.mandi, "Unknown");
        assert_eq!(row.price, None);
        assert_eq!(row.last_updated, "");
    }

    #[test]
    fn sorts_most_recent_then_commodity_then_mandi_descending() {
        let rows = normalize_rows(&[
            json!({"commodity": "Rice", "market": "Sealdah", "arrival_date": "08/10/2025"}),
            json!({"commodity": "Rice", "market": "Azadpur", "arrival_date": "09/10/2025"}),
            json!({"commodity": "Wheat", "market": "Azadpur", "arrival_date": "2025-10-09"}),
            json!({"commodity": "Rice", "market": "Burdwan", "arrival_date": "09/10/2025"}),
            json!({"commodity": "Onion", "market": "Kolkata", "arrival_date": "bad"}),
        ]);
        let order: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.commodity.as_str(), r.mandi.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Wheat", "Azadpur"),
                ("Rice", "Burdwan"),
                ("Rice", "Azadpur"),
                ("Rice", "Sealdah"),
                ("Onion", "Kolkata"),
            ]
        );
    }

    #[test]
    fn records_accepts_envelope_or_array() {
        assert_eq!(records(&json!({"records": [{"a": 1}]})).len(), 1);
        assert_eq!(records(&json!([{"a": 1}, {"b": 2}])).len(), 2);
        assert!(records(&json!({"message": "invalid key"})).is_empty());
    }

    #[test]
    fn serialized_row_uses_last_updated_key() {
        let rows = normalize_rows(&[json!({"commodity": "Rice", "arrival_date": "09/10/2025"})]);
        let value = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(value["lastUpdated"], "09/10/2025");
    }
}
