//! Weather capability backed by the Open-Meteo forecast API.
//!
//! One request fetches current conditions, hourly rain (for a next-24h total)
//! and a 7-day daily forecast; [`normalize_forecast`] turns the payload into a
//! [`WeatherBundle`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Serialize;
use serde_json::Value;

use super::args::{ToolArgs, ToolName};
use super::errors::ToolError;
use super::http::{as_f64, build_client, get_json, round2};
use super::registry::ToolCapability;
use crate::inference::config::WeatherToolConfig;

const CURRENT_FIELDS: &str =
    "temperature_2m,precipitation,wind_speed_10m,relative_humidity_2m,rain,showers";
const HOURLY_FIELDS: &str = "rain,showers";
const DAILY_FIELDS: &str = "temperature_2m_max,temperature_2m_min,precipitation_sum,rain_sum,\
showers_sum,relative_humidity_2m_mean,precipitation_probability_max";
const FORECAST_DAYS: u32 = 7;

// ─── Payload Types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentWeather {
    pub temperature_c: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub humidity_pct: Option<f64>,
    /// Rain plus showers.
    pub rain_mm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyForecast {
    pub date: String,
    pub tmax_c: Option<f64>,
    pub tmin_c: Option<f64>,
    pub precip_mm: Option<f64>,
    pub humidity_mean_pct: Option<f64>,
    /// `rain_sum + showers_sum`.
    pub rain_mm: f64,
    pub rain_chance_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherBundle {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub current: CurrentWeather,
    pub daily: Vec<DailyForecast>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next24h_total_rain_mm: Option<f64>,
}

// ─── Normalization ───────────────────────────────────────────────────────────

fn array<'a>(section: Option<&'a Value>, key: &str) -> &'a [Value] {
    section
        .and_then(|s| s.get(key))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Normalize an Open-Meteo forecast payload.
///
/// Daily rows are truncated to the shortest of `time`, `tmax`, `tmin` and
/// `precipitation_sum`; optional series missing an entry leave it empty.
pub fn normalize_forecast(payload: &Value) -> WeatherBundle {
    let cur = payload.get("current");
    let field = |key: &str| as_f64(cur.and_then(|c| c.get(key)));

    let current = CurrentWeather {
        temperature_c: field("temperature_2m"),
        wind_speed_ms: field("wind_speed_10m"),
        precipitation_mm: field("precipitation"),
        humidity_pct: field("relative_humidity_2m"),
        rain_mm: round2(field("rain").unwrap_or(0.0) + field("showers").unwrap_or(0.0)),
    };

    // Next 24h: pad the shorter hourly series with zeros.
    let hourly = payload.get("hourly");
    let rain = array(hourly, "rain");
    let showers = array(hourly, "showers");
    let hours = rain.len().min(24).max(showers.len().min(24));
    let next24h_total_rain_mm = (hours > 0).then(|| {
        let total: f64 = (0..hours)
            .map(|i| as_f64(rain.get(i)).unwrap_or(0.0) + as_f64(showers.get(i)).unwrap_or(0.0))
            .sum();
        round2(total)
    });

    let daily_section = payload.get("daily");
    let times = array(daily_section, "time");
    let tmaxs = array(daily_section, "temperature_2m_max");
    let tmins = array(daily_section, "temperature_2m_min");
    let precs = array(daily_section, "precipitation_sum");
    let rains = array(daily_section, "rain_sum");
    let shower_sums = array(daily_section, "showers_sum");
    let hums = array(daily_section, "relative_humidity_2m_mean");
    let chances = array(daily_section, "precipitation_probability_max");

    let days = times
        .len()
        .min(tmaxs.len())
        .min(tmins.len())
        .min(precs.len());
    if days < times.len() {
        tracing::warn!(
            times = times.len(),
            kept = days,
            "daily forecast series have mismatched lengths, truncating"
        );
    }

    let daily = (0..days)
        .map(|i| DailyForecast {
            date: times[i]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| times[i].to_string()),
            tmax_c: as_f64(tmaxs.get(i)),
            tmin_c: as_f64(tmins.get(i)),
            precip_mm: as_f64(precs.get(i)),
            humidity_mean_pct: as_f64(hums.get(i)),
            rain_mm: round2(
                as_f64(rains.get(i)).unwrap_or(0.0) + as_f64(shower_sums.get(i)).unwrap_or(0.0),
            ),
            rain_chance_pct: as_f64(chances.get(i)),
        })
        .collect();

    WeatherBundle {
        latitude: as_f64(payload.get("latitude")),
        longitude: as_f64(payload.get("longitude")),
        current,
        daily,
        next24h_total_rain_mm,
    }
}

// ─── Capability ──────────────────────────────────────────────────────────────

/// Open-Meteo forecast client.
pub struct OpenMeteoWeather {
    http: HttpClient,
    config: WeatherToolConfig,
}

impl OpenMeteoWeather {
    pub fn new(config: WeatherToolConfig) -> Result<Self, ToolError> {
        let http = build_client(ToolName::Weather, Duration::from_secs(config.timeout_secs.max(1)))?;
        Ok(Self { http, config })
    }

    pub async fn forecast(&self, lat: f64, lon: f64) -> Result<WeatherBundle, ToolError> {
        let request = self.http.get(&self.config.base_url).query(&[
            ("latitude", lat.to_string()),
            ("longitude", lon.to_string()),
            ("timezone", "auto".to_string()),
            ("temperature_unit", "celsius".to_string()),
            ("windspeed_unit", "ms".to_string()),
            ("current", CURRENT_FIELDS.to_string()),
            ("hourly", HOURLY_FIELDS.to_string()),
            ("daily", DAILY_FIELDS.to_string()),
            ("forecast_days", FORECAST_DAYS.to_string()),
        ]);
        let payload = get_json(ToolName::Weather, request).await?;
        Ok(normalize_forecast(&payload))
    }
}

#[async_trait]
impl ToolCapability for OpenMeteoWeather {
    fn name(&self) -> ToolName {
        ToolName::Weather
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let coords = args.coords().ok_or_else(|| ToolError::InvalidArguments {
            tool: ToolName::Weather.to_string(),
            reason: "expected lat/lon".into(),
        })?;
        let bundle = self.forecast(coords.lat, coords.lon).await?;
        serde_json::to_value(bundle).map_err(|e| ToolError::Upstream {
            tool: ToolName::Weather.to_string(),
            reason: format!("failed to encode forecast: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "latitude": 22.5,
            "longitude": 88.375,
            "current": {
                "temperature_2m": 31.2,
                "precipitation": 0.4,
                "wind_speed_10m": 3.1,
                "relative_humidity_2m": 78,
                "rain": 0.3,
                "showers": 0.1
            },
            "hourly": {
                "rain": [0.5, 0.25, 0.0],
                "showers": [0.1]
            },
            "daily": {
                "time": ["2025-10-09", "2025-10-10", "2025-10-11"],
                "temperature_2m_max": [33.0, 32.5, 31.0],
                "temperature_2m_min": [26.0, 25.5, 25.0],
                "precipitation_sum": [4.2, 0.0],
                "rain_sum": [3.0, 0.0],
                "showers_sum": [1.2],
                "relative_humidity_2m_mean": [80],
                "precipitation_probability_max": [70, 10]
            }
        })
    }

    #[test]
    fn normalizes_current_conditions() {
        let bundle = normalize_forecast(&sample_payload());
        assert_eq!(bundle.current.temperature_c, Some(31.2));
        assert_eq!(bundle.current.humidity_pct, Some(78.0));
        assert_eq!(bundle.current.rain_mm, 0.4);
        assert_eq!(bundle.latitude, Some(22.5));
    }

    #[test]
    fn next24h_pads_shorter_hourly_series() {
        let bundle = normalize_forecast(&sample_payload());
        assert_eq!(bundle.next24h_total_rain_mm, Some(0.85));
    }

    #[test]
    fn next24h_only_counts_first_day() {
        let payload = json!({"hourly": {"rain": vec![1.0; 48], "showers": []}});
        let bundle = normalize_forecast(&payload);
        assert_eq!(bundle.next24h_total_rain_mm, Some(24.0));
    }

    #[test]
    fn daily_truncates_to_shortest_critical_series() {
        let bundle = normalize_forecast(&sample_payload());
        assert_eq!(bundle.daily.len(), 2);
        let day0 = &bundle.daily[0];
        assert_eq!(day0.date, "2025-10-09");
        assert_eq!(day0.rain_mm, 4.2);
        assert_eq!(day0.humidity_mean_pct, Some(80.0));
        let day1 = &bundle.daily[1];
        assert_eq!(day1.rain_mm, 0.0);
        assert_eq!(day1.humidity_mean_pct, None);
        assert_eq!(day1.rain_chance_pct, Some(10.0));
    }

    #[test]
    fn empty_payload_normalizes_without_panicking() {
        let bundle = normalize_forecast(&json!({}));
        assert!(bundle.daily.is_empty());
        assert!(bundle.next24h_total_rain_mm.is_none());
        assert_eq!(bundle.current.rain_mm, 0.0);
        let encoded = serde_json::to_value(&bundle).unwrap();
        assert!(encoded.get("next24h_total_rain_mm").is_none());
    }
}
