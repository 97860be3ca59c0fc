//! Soil capability backed by the ISRIC SoilGrids query API.
//!
//! SoilGrids returns empty cells for many points (water, urban masks, cell
//! edges), so a lookup walks outward until it finds populated data:
//! 1. the exact point
//! 2. the point snapped to a ~250 m grid
//! 3. rings of neighbours probed in parallel; first useful cell wins and the
//!    remaining probes are dropped
//!
//! Each lookup is one attempt of a [`RetryPolicy`].

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client as HttpClient;
use serde::Serialize;
use serde_json::Value;

use super::args::{ToolArgs, ToolName};
use super::errors::ToolError;
use super::http::{as_f64, build_client, get_json};
use super::registry::ToolCapability;
use crate::agent_core::retry::{retry, RetryPolicy};
use crate::inference::config::SoilToolConfig;

const PROPERTIES: [&str; 6] = ["phh2o", "soc", "nitrogen", "clay", "sand", "silt"];
const TOPSOIL_DEPTH: &str = "0-5cm";
const EARTH_RADIUS_M: f64 = 6_371_000.0;

// ─── Payload Types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoilLayer {
    pub depth_cm_from: i32,
    pub depth_cm_to: i32,
    pub ph_h2o: Option<f64>,
    pub soc_g_per_kg: Option<f64>,
    pub nitrogen_g_per_kg: Option<f64>,
    pub clay_g_per_kg: Option<f64>,
    pub sand_g_per_kg: Option<f64>,
    pub silt_g_per_kg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoilBundle {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub layers: Vec<SoilLayer>,
    pub topsoil: Option<SoilLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_distance_m: Option<f64>,
}

/// Raw payload plus the point it was found at.
#[derive(Debug, Clone)]
pub struct ResolvedPoint {
    pub payload: Value,
    pub lat: f64,
    pub lon: f64,
    pub distance_m: f64,
}

/// Neighbour-search geometry.
#[derive(Debug, Clone, Copy)]
pub struct SearchGeometry {
    pub snap_step_deg: f64,
    pub ring_step_deg: f64,
    pub rings: u32,
    pub probe_concurrency: usize,
}

impl From<&SoilToolConfig> for SearchGeometry {
    fn from(c: &SoilToolConfig) -> Self {
        Self {
            snap_step_deg: c.snap_step_deg,
            ring_step_deg: c.ring_step_deg,
            rings: c.rings,
            probe_concurrency: c.probe_concurrency.max(1),
        }
    }
}

// ─── Normalization ───────────────────────────────────────────────────────────

/// Parse `"0-5cm"` into `(0, 5)`; unparseable labels map to `(0, 0)`.
fn parse_depth_label(label: &str) -> (i32, i32) {
    let cleaned = label.to_ascii_lowercase().replace("cm", "");
    match cleaned.trim().split_once('-') {
        Some((a, b)) => match (a.trim().parse(), b.trim().parse()) {
            (Ok(a), Ok(b)) => (a, b),
            _ => (0, 0),
        },
        None => (0, 0),
    }
}

/// Normalize a SoilGrids `properties/query` payload.
///
/// Means are divided by each property's `d_factor`; layers are ordered by depth.
pub fn normalize_soilgrids(payload: &Value) -> SoilBundle {
    let coords = payload
        .pointer("/geometry/coordinates")
        .and_then(Value::as_array);
    let longitude = as_f64(coords.and_then(|c| c.first()));
    let latitude = as_f64(coords.and_then(|c| c.get(1)));

    // depth key -> property -> value
    let mut by_depth: BTreeMap<(i32, i32, String), BTreeMap<String, Option<f64>>> = BTreeMap::new();

    let layers = payload
        .pointer("/properties/layers")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    for layer in layers {
        let name = layer
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !PROPERTIES.contains(&name.as_str()) {
            continue;
        }
        let d_factor = as_f64(layer.pointer("/unit_measure/d_factor"))
            .filter(|f| *f != 0.0)
            .unwrap_or(1.0);

        for depth in layer
            .get("depths")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
        {
            let label = depth
                .get("label")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            let (from, to) = parse_depth_label(&label);
            let mean = as_f64(depth.pointer("/values/mean")).map(|m| m / d_factor);
            by_depth
                .entry((from, to, label))
                .or_default()
                .insert(name.clone(), mean);
        }
    }

    let layers: Vec<SoilLayer> = by_depth
        .into_iter()
        .map(|((from, to, _), props)| {
            let get = |k: &str| props.get(k).copied().flatten();
            SoilLayer {
                depth_cm_from: from,
                depth_cm_to: to,
                ph_h2o: get("phh2o"),
                soc_g_per_kg: get("soc"),
                nitrogen_g_per_kg: get("nitrogen"),
                clay_g_per_kg: get("clay"),
                sand_g_per_kg: get("sand"),
                silt_g_per_kg: get("silt"),
            }
        })
        .collect();

    SoilBundle {
        latitude,
        longitude,
        topsoil: layers.first().cloned(),
        layers,
        resolved_latitude: None,
        resolved_longitude: None,
        resolved_distance_m: None,
    }
}

/// Whether any property at any depth has a numeric mean.
pub fn has_useful_layers(payload: &Value) -> bool {
    payload
        .pointer("/properties/layers")
        .and_then(Value::as_array)
        .is_some_and(|layers| {
            layers.iter().any(|layer| {
                layer
                    .get("depths")
                    .and_then(Value::as_array)
                    .is_some_and(|depths| {
                        depths
                            .iter()
                            .any(|d| d.pointer("/values/mean").and_then(Value::as_f64).is_some())
                    })
            })
        })
}

// ─── Geometry ────────────────────────────────────────────────────────────────

pub fn snap_to_grid(lat: f64, lon: f64, step_deg: f64) -> (f64, f64) {
    (
        (lat / step_deg).round() * step_deg,
        (lon / step_deg).round() * step_deg,
    )
}

/// Perimeter points of rings `1..=rings`, each snapped to the ring grid,
/// inner rings first, without duplicates.
pub fn ring_probe_points(lat: f64, lon: f64, step_deg: f64, rings: u32) -> Vec<(f64, f64)> {
    let mut seen = HashSet::new();
    let mut points = Vec::new();
    for k in 1..=rings as i64 {
        for dy in -k..=k {
            for dx in -k..=k {
                if dx.abs().max(dy.abs()) != k {
                    continue;
                }
                let (plat, plon) = snap_to_grid(
                    lat + dy as f64 * step_deg,
                    lon + dx as f64 * step_deg,
                    step_deg,
                );
                let key = ((plat * 1e6).round() as i64, (plon * 1e6).round() as i64);
                if seen.insert(key) {
                    points.push((plat, plon));
                }
            }
        }
    }
    points
}

/// Great-circle distance in metres.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlmb = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dlmb / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

// ─── Neighbour Search ────────────────────────────────────────────────────────

/// Find the closest populated cell around `(lat, lon)` using `fetch`.
///
/// Fetch failures at individual points are skipped; only exhausting every
/// candidate is an error.
pub async fn resolve_neighbourhood<F, Fut>(
    lat: f64,
    lon: f64,
    geometry: SearchGeometry,
    fetch: F,
) -> Result<ResolvedPoint, ToolError>
where
    F: Fn(f64, f64) -> Fut,
    Fut: Future<Output = Result<Value, ToolError>>,
{
    let hit = |payload: Value, plat: f64, plon: f64| ResolvedPoint {
        payload,
        lat: plat,
        lon: plon,
        distance_m: haversine_m(lat, lon, plat, plon),
    };

    match fetch(lat, lon).await {
        Ok(payload) if has_useful_layers(&payload) => return Ok(hit(payload, lat, lon)),
        Ok(_) => tracing::debug!(lat, lon, "soil cell empty at exact point"),
        Err(e) => tracing::debug!(lat, lon, error = %e, "soil fetch failed at exact point"),
    }

    let (slat, slon) = snap_to_grid(lat, lon, geometry.snap_step_deg);
    if (slat, slon) != (lat, lon) {
        match fetch(slat, slon).await {
            Ok(payload) if has_useful_layers(&payload) => return Ok(hit(payload, slat, slon)),
            Ok(_) => tracing::debug!(lat = slat, lon = slon, "soil cell empty at snapped point"),
            Err(e) => tracing::debug!(error = %e, "soil fetch failed at snapped point"),
        }
    }

    let points = ring_probe_points(lat, lon, geometry.ring_step_deg, geometry.rings);
    let probe_count = points.len();
    let mut probes = stream::iter(points)
        .map(|(plat, plon)| {
            let fut = fetch(plat, plon);
            async move { (fut.await, plat, plon) }
        })
        .buffer_unordered(geometry.probe_concurrency.max(1));

    while let Some((result, plat, plon)) = probes.next().await {
        if let Ok(payload) = result {
            if has_useful_layers(&payload) {
                tracing::debug!(lat = plat, lon = plon, "soil data found in neighbour ring");
                return Ok(hit(payload, plat, plon));
            }
        }
    }

    Err(ToolError::NoData {
        tool: ToolName::Soil.to_string(),
        reason: format!("no soil data found in neighbourhood ({probe_count} probes)"),
    })
}

// ─── Capability ──────────────────────────────────────────────────────────────

/// SoilGrids client with neighbour search and retry.
pub struct SoilGridsSoil {
    http: HttpClient,
    config: SoilToolConfig,
    policy: RetryPolicy,
}

impl SoilGridsSoil {
    pub fn new(config: SoilToolConfig) -> Result<Self, ToolError> {
        let http = build_client(ToolName::Soil, Duration::from_secs(config.timeout_secs.max(1)))?;
        let policy = RetryPolicy::linear(config.attempts, Duration::from_millis(config.backoff_ms));
        Ok(Self {
            http,
            config,
            policy,
        })
    }

    async fn fetch_point(&self, lat: f64, lon: f64) -> Result<Value, ToolError> {
        let mut query: Vec<(&str, String)> = vec![
            ("lon", lon.to_string()),
            ("lat", lat.to_string()),
            ("depth", TOPSOIL_DEPTH.to_string()),
            ("value", "mean".to_string()),
        ];
        query.extend(PROPERTIES.iter().map(|p| ("property", p.to_string())));

        get_json(ToolName::Soil, self.http.get(&self.config.base_url).query(&query)).await
    }

    /// One bounded neighbour-search attempt.
    async fn lookup_once(&self, lat: f64, lon: f64) -> Result<ResolvedPoint, ToolError> {
        let budget = Duration::from_secs(self.config.timeout_secs);
        let search = resolve_neighbourhood(lat, lon, SearchGeometry::from(&self.config), |a, b| {
            self.fetch_point(a, b)
        });
        tokio::time::timeout(budget, search)
            .await
            .unwrap_or_else(|_| {
                Err(ToolError::Timeout {
                    tool: ToolName::Soil.to_string(),
                    timeout_ms: budget.as_millis() as u64,
                })
            })
    }

    pub async fn profile(&self, lat: f64, lon: f64) -> Result<SoilBundle, ToolError> {
        let resolved = retry(&self.policy, "soil lookup", |_| self.lookup_once(lat, lon)).await?;

        let mut bundle = normalize_soilgrids(&resolved.payload);
        bundle.resolved_latitude = Some(resolved.lat);
        bundle.resolved_longitude = Some(resolved.lon);
        bundle.resolved_distance_m = Some((resolved.distance_m * 10.0).round() / 10.0);
        Ok(bundle)
    }
}

#[async_trait]
impl ToolCapability for SoilGridsSoil {
    fn name(&self) -> ToolName {
        ToolName::Soil
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let coords = args.coords().ok_or_else(|| ToolError::InvalidArguments {
            tool: ToolName::Soil.to_string(),
            reason: "expected lat/lon".into(),
        })?;
        let bundle = self.profile(coords.lat, coords.lon).await?;
        serde_json::to_value(bundle).map_err(|e| ToolError::Upstream {
            tool: ToolName::Soil.to_string(),
            reason: format!("failed to encode soil profile: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn populated(lat: f64, lon: f64) -> Value {
        json!({
            "geometry": {"coordinates": [lon, lat]},
            "properties": {"layers": [
                {"name": "phh2o", "unit_measure": {"d_factor": 10},
                 "depths": [{"label": "0-5cm", "values": {"mean": 65}},
                            {"label": "5-15cm", "values": {"mean": 67}}]},
                {"name": "soc", "unit_measure": {"d_factor": 10},
                 "depths": [{"label": "0-5cm", "values": {"mean": 142}}]},
                {"name": "nitrogen", "unit_measure": {"d_factor": 100},
                 "depths": [{"label": "0-5cm", "values": {"mean": 154}}]},
                {"name": "bdod", "unit_measure": {"d_factor": 100},
                 "depths": [{"label": "0-5cm", "values": {"mean": 130}}]}
            ]}
        })
    }

    fn empty_cell() -> Value {
        json!({"properties": {"layers": [
            {"name": "phh2o", "depths": [{"label": "0-5cm", "values": {"mean": null}}]}
        ]}})
    }

    fn geometry() -> SearchGeometry {
        SearchGeometry {
            snap_step_deg: 0.0025,
            ring_step_deg: 0.0015,
            rings: 4,
            probe_concurrency: 8,
        }
    }

    #[test]
    fn normalizes_layers_with_d_factor() {
        let bundle = normalize_soilgrids(&populated(22.5, 88.3));
        assert_eq!(bundle.latitude, Some(22.5));
        assert_eq!(bundle.layers.len(), 2);
        let top = bundle.topsoil.unwrap();
        assert_eq!((top.depth_cm_from, top.depth_cm_to), (0, 5));
        assert_eq!(top.ph_h2o, Some(6.5));
        assert_eq!(top.soc_g_per_kg, Some(14.2));
        assert_eq!(top.nitrogen_g_per_kg, Some(1.54));
        assert_eq!(top.clay_g_per_kg, None);
        assert_eq!(bundle.layers[1].ph_h2o, Some(6.7));
        assert_eq!(bundle.layers[1].soc_g_per_kg, None);
    }

    #[test]
    fn useful_layer_detection() {
        assert!(has_useful_layers(&populated(0.0, 0.0)));
        assert!(!has_useful_layers(&empty_cell()));
        assert!(!has_useful_layers(&json!({})));
    }

    #[test]
    fn depth_labels_parse() {
        assert_eq!(parse_depth_label("0-5cm"), (0, 5));
        assert_eq!(parse_depth_label("100-200cm"), (100, 200));
        assert_eq!(parse_depth_label("topsoil"), (0, 0));
    }

    #[test]
    fn ring_points_cover_perimeters_without_duplicates() {
        let points = ring_probe_points(22.5, 88.3, 0.0015, 2);
        // ring 1 has 8 cells, ring 2 has 16
        assert_eq!(points.len(), 24);
        let first = points[0];
        assert!(haversine_m(22.5, 88.3, first.0, first.1) < 400.0);
    }

    #[test]
    fn haversine_known_distance() {
        // one degree of latitude is ~111.2 km
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 100.0, "{d}");
        assert_eq!(haversine_m(22.5, 88.3, 22.5, 88.3), 0.0);
    }

    #[tokio::test]
    async fn exact_point_hit_has_zero_distance() {
        let calls = AtomicUsize::new(0);
        let resolved = resolve_neighbourhood(22.5, 88.3, geometry(), |a, b| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(populated(a, b)) }
        })
        .await
        .unwrap();
        assert_eq!(resolved.distance_m, 0.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn falls_back_to_snapped_point() {
        let (lat, lon) = (22.5011, 88.3013);
        let (slat, slon) = snap_to_grid(lat, lon, 0.0025);
        let resolved = resolve_neighbourhood(lat, lon, geometry(), |a, b| async move {
            if (a, b) == (slat, slon) {
                Ok(populated(a, b))
            } else {
                Ok(empty_cell())
            }
        })
        .await
        .unwrap();
        assert_eq!((resolved.lat, resolved.lon), (slat, slon));
        assert!(resolved.distance_m > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn ring_probe_respects_concurrency_and_stops_at_first_hit() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let started = AtomicUsize::new(0);
        let target = Mutex::new(None::<(f64, f64)>);
        let ring = ring_probe_points(22.5, 88.3, 0.0015, 4);
        *target.lock().unwrap() = Some(ring[10]);

        let geometry = SearchGeometry {
            probe_concurrency: 3,
            ..geometry()
        };
        let resolved = resolve_neighbourhood(22.5, 88.3, geometry, |a, b| {
            let is_target = target.lock().unwrap().is_some_and(|t| t == (a, b));
            started.fetch_add(1, Ordering::SeqCst);
            let (in_flight, peak) = (&in_flight, &peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                if is_target {
                    Ok(populated(a, b))
                } else {
                    Err(ToolError::Upstream {
                        tool: "soil".into(),
                        reason: "HTTP 500".into(),
                    })
                }
            }
        })
        .await
        .unwrap();

        assert_eq!((resolved.lat, resolved.lon), ring[10]);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        // exact + snapped + probes up to the hit, never the full ring set
        assert!(started.load(Ordering::SeqCst) < 2 + ring.len());
    }

    #[tokio::test]
    async fn exhausted_neighbourhood_is_no_data() {
        let geometry = SearchGeometry {
            rings: 1,
            ..geometry()
        };
        let err = resolve_neighbourhood(22.5011, 88.3013, geometry, |_, _| async {
            Ok(empty_cell())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::NoData { .. }));
    }
}
