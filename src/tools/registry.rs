//! Tool registry — maps each [`ToolName`] to the capability that serves it.
//!
//! Provides:
//! - Lookup by name, rejecting unknown and disabled tools with a typed error
//! - The planner catalog (enabled tools only, one line each)
//! - Construction of the built-in HTTP capabilities from config

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::args::{ToolArgs, ToolName};
use super::errors::ToolError;
use super::market::AgmarknetMarket;
use super::soil::SoilGridsSoil;
use super::weather::OpenMeteoWeather;
use crate::inference::ToolsConfig;

// ─── ToolCapability ──────────────────────────────────────────────────────────

/// One independently invokable data operation.
///
/// Implementations receive already-validated arguments and return a
/// tool-specific JSON payload. Timeouts are enforced by the caller.
#[async_trait]
pub trait ToolCapability: Send + Sync {
    /// The tool this capability serves.
    fn name(&self) -> ToolName;

    /// Catalog line shown to the planner.
    fn description(&self) -> &str {
        self.name().description()
    }

    /// Disabled capabilities stay registered but are hidden from the catalog
    /// and refused at dispatch.
    fn enabled(&self) -> bool {
        true
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError>;
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Capabilities keyed by tool name, in catalog order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<ToolName, Arc<dyn ToolCapability>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in weather, soil and market capabilities plus
    /// any caller-supplied ones (recos, satellite, rag, or overrides).
    ///
    /// Satellite capabilities are skipped unless `satellite_enabled` is set.
    pub fn from_config(
        config: &ToolsConfig,
        extra: Vec<Arc<dyn ToolCapability>>,
    ) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        registry.register(Arc::new(OpenMeteoWeather::new(config.weather.clone())?));
        registry.register(Arc::new(SoilGridsSoil::new(config.soil.clone())?));
        registry.register(Arc::new(AgmarknetMarket::new(config.market.clone())?));

        for tool in extra {
            if tool.name() == ToolName::Satellite && !config.satellite_enabled {
                tracing::info!("satellite capability supplied but disabled in config, skipping");
                continue;
            }
            registry.register(tool);
        }

        tracing::info!(tools = ?registry.enabled_names(), "tool registry ready");
        Ok(registry)
    }

    /// Register a capability, replacing any previous one for the same name.
    pub fn register(&mut self, tool: Arc<dyn ToolCapability>) {
        self.tools.insert(tool.name(), tool);
    }

    /// Resolve a tool for dispatch.
    pub fn get(&self, name: ToolName) -> Result<Arc<dyn ToolCapability>, ToolError> {
        let tool = self.tools.get(&name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
        })?;
        if !tool.enabled() {
            return Err(ToolError::Disabled {
                name: name.to_string(),
            });
        }
        Ok(Arc::clone(tool))
    }

    /// Whether `name` is registered and enabled.
    pub fn is_available(&self, name: ToolName) -> bool {
        self.tools.get(&name).is_some_and(|t| t.enabled())
    }

    /// Enabled tool names, in catalog order.
    pub fn enabled_names(&self) -> Vec<ToolName> {
        self.tools
            .iter()
            .filter(|(_, t)| t.enabled())
            .map(|(name, _)| *name)
            .collect()
    }

    /// `- name: description` lines for every enabled tool.
    pub fn catalog(&self) -> String {
        self.tools
            .iter()
            .filter(|(_, t)| t.enabled())
            .map(|(name, t)| format!("- {name}: {}", t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of registered tools, enabled or not.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}
