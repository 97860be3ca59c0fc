//! Top-level entry point: preference lookup plus the orchestrator.

use std::sync::Arc;

use crate::agent_core::{
    AgentOutcome, AgentRequest, FarmPreferences, GatherOutcome, GatherWorkflow, Orchestrator,
    PreferenceLookup,
};

/// Answers farmer questions. Never returns an error; failures are reported
/// through the outcome's `error` marker.
pub struct AgentService {
    prefs: Arc<dyn PreferenceLookup>,
    orchestrator: Orchestrator,
}

impl AgentService {
    pub fn new(prefs: Arc<dyn PreferenceLookup>, orchestrator: Orchestrator) -> Self {
        Self {
            prefs,
            orchestrator,
        }
    }

    /// Run the planning loop for one request.
    pub async fn ask(&self, request: &AgentRequest) -> AgentOutcome {
        let prefs = self.load_preferences(request).await;
        self.orchestrator.run(request, prefs).await
    }

    /// Query every source once and answer in a single synthesis call.
    pub async fn gather(&self, request: &AgentRequest) -> GatherOutcome {
        let workflow = GatherWorkflow::new(
            self.orchestrator.dispatcher().clone(),
            self.orchestrator.finalizer(),
            self.orchestrator.config().gather_timeout(),
        );
        workflow.run(request).await
    }

    async fn load_preferences(&self, request: &AgentRequest) -> FarmPreferences {
        match self.prefs.preferences(request.farm_id.as_deref()).await {
            Ok(prefs) => prefs,
            Err(e) => {
                tracing::warn!(
                    farm_id = request.farm_id.as_deref().unwrap_or(""),
                    error = %e,
                    "preference lookup failed, continuing without preferences"
                );
                FarmPreferences::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::test_support::{ScriptedModel, StubTool};
    use crate::agent_core::{
        AgentError, FarmDatabase, FarmRecord, Finalizer, LocationHints, Planner, RetryPolicy,
        ToolDispatcher,
    };
    use crate::inference::{GenerationParams, OrchestratorConfig, ToolsConfig};
    use crate::tools::{ToolName, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::json;

    struct BrokenStore;

    #[async_trait]
    impl PreferenceLookup for BrokenStore {
        async fn preferences(&self, _farm_id: Option<&str>) -> Result<FarmPreferences, AgentError> {
            Err(AgentError::Database {
                reason: "disk I/O error".into(),
            })
        }
    }

    fn service(prefs: Arc<dyn PreferenceLookup>, planner: ScriptedModel, finalizer: ScriptedModel) -> AgentService {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StubTool::new(ToolName::Market)));
        registry.register(Arc::new(StubTool::new(ToolName::Weather)));
        let config = OrchestratorConfig::default();
        let orchestrator = Orchestrator::new(
            Planner::new(Arc::new(planner), GenerationParams::default()),
            Finalizer::new(Arc::new(finalizer), GenerationParams::default(), RetryPolicy::once()),
            ToolDispatcher::new(Arc::new(registry), ToolsConfig::default(), 4),
            config,
        );
        AgentService::new(prefs, orchestrator)
    }

    fn market_request(farm_id: &str) -> AgentRequest {
        let mut req = AgentRequest::new("Price today?");
        req.farm_id = Some(farm_id.into());
        req.hints = LocationHints {
            district: Some("Nadia".into()),
            ..LocationHints::default()
        };
        req
    }

    #[tokio::test]
    async fn stored_preferences_drive_autofill() {
        let db = FarmDatabase::open_in_memory().unwrap();
        db.upsert_farm(&FarmRecord {
            id: "f1".into(),
            preferred_commodities: vec!["Jute".into(), "Rice".into()],
            preferred_mandi: Some("Ranaghat".into()),
            ..FarmRecord::default()
        })
        .unwrap();

        let svc = service(
            Arc::new(db),
            ScriptedModel::texts(&[r#"{"action":"tool","name":"market","args":{}}"#]),
            ScriptedModel::texts(&["Jute is steady at Ranaghat."]),
        );
        let out = svc.ask(&market_request("f1")).await;
        assert!(out.error.is_none());
        assert_eq!(
            out.steps[0].args,
            json!({"district": "Nadia", "mandi": "Ranaghat", "commodity": "Jute"})
        );
    }

    #[tokio::test]
    async fn lookup_failure_is_treated_as_empty_preferences() {
        let svc = service(
            Arc::new(BrokenStore),
            ScriptedModel::texts(&[r#"{"action":"tool","name":"market","args":{}}"#]),
            ScriptedModel::texts(&["No preference data."]),
        );
        let out = svc.ask(&market_request("f1")).await;
        assert!(out.error.is_none());
        assert_eq!(out.steps[0].args, json!({"district": "Nadia"}));
    }

    #[tokio::test]
    async fn gather_uses_the_same_tools_and_model() {
        let finalizer = ScriptedModel::texts(&["Gathered answer."]);
        let svc = service(
            Arc::new(FarmDatabase::open_in_memory().unwrap()),
            ScriptedModel::texts(&[]),
            finalizer.clone(),
        );
        let out = svc.gather(&market_request("f1")).await;
        assert_eq!(out.answer, "Gathered answer.");
        assert!(out.sources.market);
        assert!(!out.sources.weather);
        assert_eq!(finalizer.calls(), 1);
    }
}
