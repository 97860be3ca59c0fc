//! Agent configuration loading.
//!
//! Reads `krishimitra.yaml` and resolves environment variables. The resulting
//! [`AgentSettings`] is handed to each component at construction; nothing reads
//! configuration globally.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::errors::InferenceError;
use super::types::GenerationParams;
use crate::tools::ToolName;

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "krishimitra.yaml";

/// Env var holding an explicit config path.
pub const CONFIG_ENV_VAR: &str = "KRISHIMITRA_CONFIG";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Wire protocol spoken by the model endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Google `generateContent` (`candidates[0].content.parts[0].text`).
    Gemini,
    /// Any `/chat/completions` server (Ollama, vLLM, llama.cpp, OpenAI).
    OpenaiCompatible,
}

/// Sampling settings for one role (planner or finalizer).
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    pub temperature: f32,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

/// Language-model endpoint and model selection.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_provider")]
    pub provider: Provider,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub planner_model: String,
    #[serde(default = "default_model")]
    pub finalizer_model: String,
    /// Models tried in order when the primary one fails with a retriable error.
    #[serde(default = "default_fallback_chain")]
    pub fallback_chain: Vec<String>,
    #[serde(default = "default_planner_sampling")]
    pub planner: SamplingConfig,
    #[serde(default = "default_finalizer_sampling")]
    pub finalizer: SamplingConfig,
}

/// Planning loop bounds and per-layer timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of planning rounds per request (default: 3).
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// In-flight cap for a batch of tool calls (default: 4).
    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,
    /// Return to the planner after a tool round while rounds remain
    /// (default: finalize right after the first tool round).
    #[serde(default)]
    pub replan_after_tools: bool,
    #[serde(default = "default_planner_timeout_secs")]
    pub planner_timeout_secs: u64,
    #[serde(default = "default_finalizer_timeout_secs")]
    pub finalizer_timeout_secs: u64,
    /// Attempts for the finalizer call, each bounded by the finalizer timeout.
    #[serde(default = "default_finalizer_attempts")]
    pub finalizer_attempts: u32,
    #[serde(default = "default_finalizer_backoff_ms")]
    pub finalizer_backoff_ms: u64,
    /// Timeout for the single synthesis call of the gather workflow.
    #[serde(default = "default_gather_timeout_secs")]
    pub gather_timeout_secs: u64,
}

/// Open-Meteo forecast endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WeatherToolConfig {
    #[serde(default = "default_weather_url")]
    pub base_url: String,
    #[serde(default = "default_weather_timeout_secs")]
    pub timeout_secs: u64,
}

/// SoilGrids query endpoint and neighbour-search geometry.
#[derive(Debug, Clone, Deserialize)]
pub struct SoilToolConfig {
    #[serde(default = "default_soil_url")]
    pub base_url: String,
    /// Budget for one lookup attempt (exact, snapped and ring probes).
    #[serde(default = "default_soil_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_soil_attempts")]
    pub attempts: u32,
    #[serde(default = "default_soil_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_snap_step_deg")]
    pub snap_step_deg: f64,
    #[serde(default = "default_ring_step_deg")]
    pub ring_step_deg: f64,
    #[serde(default = "default_rings")]
    pub rings: u32,
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
}

/// data.gov.in Agmarknet resource.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketToolConfig {
    #[serde(default = "default_market_url")]
    pub base_url: String,
    #[serde(default = "default_market_resource")]
    pub resource_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_market_timeout_secs")]
    pub timeout_secs: u64,
    /// Rows requested from the upstream API.
    #[serde(default = "default_market_fetch_limit")]
    pub fetch_limit: u32,
    /// Rows kept after sorting.
    #[serde(default = "default_market_max_rows")]
    pub max_rows: usize,
}

/// Tool endpoints and timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_tool_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_weather_tool")]
    pub weather: WeatherToolConfig,
    #[serde(default = "default_soil_tool")]
    pub soil: SoilToolConfig,
    #[serde(default = "default_market_tool")]
    pub market: MarketToolConfig,
    /// Satellite indices need imagery credentials; off unless configured.
    #[serde(default)]
    pub satellite_enabled: bool,
    #[serde(default = "default_satellite_timeout_secs")]
    pub satellite_timeout_secs: u64,
    #[serde(default = "default_rag_timeout_secs")]
    pub rag_timeout_secs: u64,
    #[serde(default = "default_recos_timeout_secs")]
    pub recos_timeout_secs: u64,
}

/// Top-level settings (mirrors `krishimitra.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_models")]
    pub models: ModelsConfig,
    #[serde(default = "default_orchestrator")]
    pub orchestrator: OrchestratorConfig,
    #[serde(default = "default_tools")]
    pub tools: ToolsConfig,
}

// ─── Defaults ────────────────────────────────────────────────────────────────

fn default_provider() -> Provider {
    Provider::Gemini
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_fallback_chain() -> Vec<String> {
    vec!["gemini-2.0-flash".into(), "gemini-1.5-flash".into()]
}
fn default_planner_sampling() -> SamplingConfig {
    SamplingConfig {
        temperature: 0.1,
        top_p: Some(0.9),
        max_output_tokens: Some(512),
    }
}
fn default_finalizer_sampling() -> SamplingConfig {
    SamplingConfig {
        temperature: 0.2,
        top_p: None,
        max_output_tokens: None,
    }
}
fn default_max_steps() -> u32 {
    3
}
fn default_max_parallel_tools() -> usize {
    4
}
fn default_planner_timeout_secs() -> u64 {
    15
}
fn default_finalizer_timeout_secs() -> u64 {
    25
}
fn default_finalizer_attempts() -> u32 {
    1
}
fn default_finalizer_backoff_ms() -> u64 {
    500
}
fn default_gather_timeout_secs() -> u64 {
    45
}
fn default_tool_timeout_secs() -> u64 {
    15
}
fn default_weather_url() -> String {
    "https://api.open-meteo.com/v1/forecast".into()
}
fn default_weather_timeout_secs() -> u64 {
    15
}
fn default_soil_url() -> String {
    "https://rest.isric.org/soilgrids/v2.0/properties/query".into()
}
fn default_soil_timeout_secs() -> u64 {
    10
}
fn default_soil_attempts() -> u32 {
    2
}
fn default_soil_backoff_ms() -> u64 {
    250
}
fn default_snap_step_deg() -> f64 {
    0.0025
}
fn default_ring_step_deg() -> f64 {
    0.0015
}
fn default_rings() -> u32 {
    4
}
fn default_probe_concurrency() -> usize {
    8
}
fn default_market_url() -> String {
    "https://api.data.gov.in/resource".into()
}
fn default_market_resource() -> String {
    "9ef84268-d588-465a-a308-a864a43d0070".into()
}
fn default_market_timeout_secs() -> u64 {
    12
}
fn default_market_fetch_limit() -> u32 {
    50
}
fn default_market_max_rows() -> usize {
    25
}
fn default_satellite_timeout_secs() -> u64 {
    15
}
fn default_rag_timeout_secs() -> u64 {
    12
}
fn default_recos_timeout_secs() -> u64 {
    12
}
fn default_weather_tool() -> WeatherToolConfig {
    WeatherToolConfig {
        base_url: default_weather_url(),
        timeout_secs: default_weather_timeout_secs(),
    }
}
fn default_soil_tool() -> SoilToolConfig {
    SoilToolConfig {
        base_url: default_soil_url(),
        timeout_secs: default_soil_timeout_secs(),
        attempts: default_soil_attempts(),
        backoff_ms: default_soil_backoff_ms(),
        snap_step_deg: default_snap_step_deg(),
        ring_step_deg: default_ring_step_deg(),
        rings: default_rings(),
        probe_concurrency: default_probe_concurrency(),
    }
}
fn default_market_tool() -> MarketToolConfig {
    MarketToolConfig {
        base_url: default_market_url(),
        resource_id: default_market_resource(),
        api_key: None,
        timeout_secs: default_market_timeout_secs(),
        fetch_limit: default_market_fetch_limit(),
        max_rows: default_market_max_rows(),
    }
}
fn default_models() -> ModelsConfig {
    ModelsConfig {
        provider: default_provider(),
        base_url: default_base_url(),
        api_key: None,
        planner_model: default_model(),
        finalizer_model: default_model(),
        fallback_chain: default_fallback_chain(),
        planner: default_planner_sampling(),
        finalizer: default_finalizer_sampling(),
    }
}
fn default_orchestrator() -> OrchestratorConfig {
    OrchestratorConfig {
        max_steps: default_max_steps(),
        max_parallel_tools: default_max_parallel_tools(),
        replan_after_tools: false,
        planner_timeout_secs: default_planner_timeout_secs(),
        finalizer_timeout_secs: default_finalizer_timeout_secs(),
        finalizer_attempts: default_finalizer_attempts(),
        finalizer_backoff_ms: default_finalizer_backoff_ms(),
        gather_timeout_secs: default_gather_timeout_secs(),
    }
}
fn default_tools() -> ToolsConfig {
    ToolsConfig {
        default_timeout_secs: default_tool_timeout_secs(),
        weather: default_weather_tool(),
        soil: default_soil_tool(),
        market: default_market_tool(),
        satellite_enabled: false,
        satellite_timeout_secs: default_satellite_timeout_secs(),
        rag_timeout_secs: default_rag_timeout_secs(),
        recos_timeout_secs: default_recos_timeout_secs(),
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        default_orchestrator()
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        default_tools()
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            models: default_models(),
            orchestrator: default_orchestrator(),
            tools: default_tools(),
        }
    }
}

// ─── Derived values ──────────────────────────────────────────────────────────

impl ModelsConfig {
    /// Call parameters for planner requests.
    pub fn planner_params(&self, timeout: Duration) -> GenerationParams {
        self.planner.to_params(timeout)
    }

    /// Call parameters for finalizer requests.
    pub fn finalizer_params(&self, timeout: Duration) -> GenerationParams {
        self.finalizer.to_params(timeout)
    }
}

impl SamplingConfig {
    fn to_params(&self, timeout: Duration) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_output_tokens: self.max_output_tokens,
            timeout,
        }
    }
}

impl OrchestratorConfig {
    pub fn planner_timeout(&self) -> Duration {
        Duration::from_secs(self.planner_timeout_secs)
    }

    pub fn finalizer_timeout(&self) -> Duration {
        Duration::from_secs(self.finalizer_timeout_secs)
    }

    pub fn gather_timeout(&self) -> Duration {
        Duration::from_secs(self.gather_timeout_secs)
    }
}

impl ToolsConfig {
    /// Dispatcher-level timeout for one call of `tool`.
    ///
    /// Soil gets room for every retry attempt plus the backoff between them.
    pub fn timeout_for(&self, tool: ToolName) -> Duration {
        let secs = match tool {
            ToolName::Weather => self.weather.timeout_secs,
            ToolName::Soil => {
                let attempts = u64::from(self.soil.attempts.max(1));
                let backoff_ms: u64 = (1..attempts).map(|i| self.soil.backoff_ms * i).sum();
                return Duration::from_secs(self.soil.timeout_secs * attempts)
                    + Duration::from_millis(backoff_ms);
            }
            ToolName::Market => self.market.timeout_secs,
            ToolName::Satellite => self.satellite_timeout_secs,
            ToolName::Rag => self.rag_timeout_secs,
            ToolName::Recos => self.recos_timeout_secs,
        };
        if secs == 0 {
            Duration::from_secs(self.default_timeout_secs)
        } else {
            Duration::from_secs(secs)
        }
    }
}

impl AgentSettings {
    /// Settings built from defaults plus API keys from the environment.
    ///
    /// Used when no config file is found.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.models.api_key = non_empty_env("GEMINI_API_KEY");
        settings.tools.market.api_key = non_empty_env("DATA_GOV_IN_API_KEY");
        settings.tools.satellite_enabled =
            non_empty_env("SH_CLIENT_ID").is_some() && non_empty_env("SH_CLIENT_SECRET").is_some();
        settings
    }

    /// Resolve settings: explicit path, then `KRISHIMITRA_CONFIG`, then an
    /// upward search from `start`, then [`AgentSettings::from_env`].
    pub fn load(explicit: Option<&Path>, start: &Path) -> Result<Self, InferenceError> {
        if let Some(path) = explicit {
            return load_settings(path);
        }
        match find_config_path(start) {
            Ok(path) => {
                tracing::info!(path = %path.display(), "loading agent config");
                load_settings(&path)
            }
            Err(_) => {
                tracing::info!("no config file found, using defaults and environment");
                Ok(Self::from_env())
            }
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate `krishimitra.yaml`.
///
/// Checks `KRISHIMITRA_CONFIG` first, then searches upward from `start`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, InferenceError> {
    // 1. Check env var
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(InferenceError::ConfigError {
        reason: format!("could not find {CONFIG_FILE_NAME}"),
    })
}

/// Load and parse the settings file.
///
/// Performs environment-variable interpolation on values matching
/// `${VAR_NAME}` or `${VAR_NAME:-default}`.
pub fn load_settings(path: &Path) -> Result<AgentSettings, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    parse_settings(&raw)
}

/// Parse settings from YAML text after env interpolation.
pub fn parse_settings(raw: &str) -> Result<AgentSettings, InferenceError> {
    let interpolated = interpolate_env_vars(raw)?;

    let mut settings: AgentSettings =
        serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        })?;

    // `${KEY:-}` interpolates to an empty string; treat it as unset.
    if settings.models.api_key.as_deref().is_some_and(str::is_empty) {
        settings.models.api_key = None;
    }
    if settings.tools.market.api_key.as_deref().is_some_and(str::is_empty) {
        settings.tools.market.api_key = None;
    }

    if settings.orchestrator.max_parallel_tools == 0 {
        return Err(InferenceError::ConfigError {
            reason: "orchestrator.max_parallel_tools must be at least 1".into(),
        });
    }

    Ok(settings)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
///
/// An unterminated `${` is a config error rather than a silent truncation.
fn interpolate_env_vars(input: &str) -> Result<String, InferenceError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_expr.push(c);
            }
            if !closed {
                return Err(InferenceError::ConfigError {
                    reason: format!("unterminated '${{{var_expr}' in config"),
                });
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Resolve `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__KM_TEST_NONEXISTENT_VAR__");
        let input = "${__KM_TEST_NONEXISTENT_VAR__:-fallback-key}";
        assert_eq!(interpolate_env_vars(input).unwrap(), "fallback-key");
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__KM_TEST_INFERENCE_VAR__", "secret");
        let input = "api_key: ${__KM_TEST_INFERENCE_VAR__:-none}";
        assert_eq!(interpolate_env_vars(input).unwrap(), "api_key: secret");
        std::env::remove_var("__KM_TEST_INFERENCE_VAR__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain text with no variables";
        assert_eq!(interpolate_env_vars(input).unwrap(), input);
    }

    #[test]
    fn unterminated_var_is_config_error() {
        let yaml = "models:\n  api_key: ${GEMINI_API_KEY\norchestrator:\n  max_steps: 5\n";
        let err = parse_settings(yaml).unwrap_err();
        assert!(matches!(err, InferenceError::ConfigError { .. }));
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/krishimitra.yaml");
        assert!(!result.starts_with('~'), "tilde should be expanded");
        assert!(result.ends_with("/krishimitra.yaml"));
    }

    #[test]
    fn empty_yaml_yields_defaults() {
        let settings = parse_settings("{}").unwrap();
        assert_eq!(settings.orchestrator.max_steps, 3);
        assert_eq!(settings.orchestrator.max_parallel_tools, 4);
        assert!(!settings.orchestrator.replan_after_tools);
        assert_eq!(settings.orchestrator.planner_timeout(), Duration::from_secs(15));
        assert_eq!(settings.orchestrator.finalizer_timeout(), Duration::from_secs(25));
        assert_eq!(settings.models.provider, Provider::Gemini);
        assert_eq!(settings.models.planner.max_output_tokens, Some(512));
        assert!(!settings.tools.satellite_enabled);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let yaml = r#"
            models:
              provider: openai_compatible
              base_url: "http://localhost:11434/v1"
              planner_model: qwen2.5
            orchestrator:
              max_steps: 5
              replan_after_tools: true
            tools:
              market:
                timeout_secs: 20
        "#;
        let settings = parse_settings(yaml).unwrap();
        assert_eq!(settings.models.provider, Provider::OpenaiCompatible);
        assert_eq!(settings.models.planner_model, "qwen2.5");
        assert_eq!(settings.models.finalizer_model, "gemini-2.5-flash");
        assert_eq!(settings.orchestrator.max_steps, 5);
        assert!(settings.orchestrator.replan_after_tools);
        assert_eq!(settings.orchestrator.max_parallel_tools, 4);
        assert_eq!(settings.tools.market.timeout_secs, 20);
        assert_eq!(settings.tools.market.max_rows, 25);
    }

    #[test]
    fn empty_interpolated_key_is_none() {
        std::env::remove_var("__KM_TEST_MISSING_KEY__");
        let yaml = "models:\n  api_key: \"${__KM_TEST_MISSING_KEY__:-}\"\n";
        let settings = parse_settings(yaml).unwrap();
        assert!(settings.models.api_key.is_none());
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let err = parse_settings("orchestrator:\n  max_parallel_tools: 0\n").unwrap_err();
        assert!(matches!(err, InferenceError::ConfigError { .. }));
    }

    #[test]
    fn planner_params_follow_sampling_config() {
        let settings = AgentSettings::default();
        let params = settings.models.planner_params(Duration::from_secs(15));
        assert!((params.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(params.top_p, Some(0.9));
        assert_eq!(params.max_output_tokens, Some(512));
        assert_eq!(params.timeout, Duration::from_secs(15));
    }

    #[test]
    fn tool_timeouts_per_capability() {
        let tools = ToolsConfig::default();
        assert_eq!(tools.timeout_for(ToolName::Weather), Duration::from_secs(15));
        assert_eq!(tools.timeout_for(ToolName::Market), Duration::from_secs(12));
        assert_eq!(tools.timeout_for(ToolName::Rag), Duration::from_secs(12));
        // two 10s attempts plus one 250ms backoff
        assert_eq!(
            tools.timeout_for(ToolName::Soil),
            Duration::from_millis(20_250)
        );
    }

    #[test]
    fn zero_tool_timeout_falls_back_to_default() {
        let mut tools = ToolsConfig::default();
        tools.rag_timeout_secs = 0;
        assert_eq!(tools.timeout_for(ToolName::Rag), Duration::from_secs(15));
    }

    #[test]
    fn load_settings_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "orchestrator:\n  max_steps: 2\n").unwrap();
        let settings = AgentSettings::load(Some(&path), dir.path()).unwrap();
        assert_eq!(settings.orchestrator.max_steps, 2);
    }

    #[test]
    fn find_config_path_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "{}").unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        let found = find_config_path(&nested).unwrap();
        assert_eq!(found, dir.path().join(CONFIG_FILE_NAME));
    }
}
