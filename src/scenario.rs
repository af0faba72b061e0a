//! Resolves a request's `scenario` identifier to the already-provisioned
//! agent ids the worker needs to start a run.
//!
//! Provisioning agents on the foundation-model service, and the CRUD surface
//! for scenario definitions, are both treated as conventional plumbing
//! outside the engine; this registry is the thin seam the HTTP layer calls
//! to go from a scenario name to resolved ids before handing off to the
//! session store, in the same spirit as the model registry's
//! config-to-service lookup.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::ApiError;

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    pub orchestrator_agent_id: String,
    #[serde(default)]
    pub sub_agent_ids: Vec<String>,
}

pub struct ScenarioRegistry {
    scenarios: HashMap<String, ScenarioConfig>,
}

impl ScenarioRegistry {
    /// Loads scenario definitions from `ENGINE_SCENARIOS`, a JSON object of
    /// `{scenario: {orchestrator_agent_id, sub_agent_ids}}`. Falls back to a
    /// single `default` scenario so the engine is usable without any
    /// external scenario configuration.
    pub fn from_env() -> Self {
        let scenarios = std::env::var("ENGINE_SCENARIOS")
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(Self::defaults);
        Self { scenarios }
    }

    fn defaults() -> HashMap<String, ScenarioConfig> {
        let mut map = HashMap::new();
        map.insert(
            "default".to_string(),
            ScenarioConfig {
                orchestrator_agent_id: "orchestrator-default".to_string(),
                sub_agent_ids: vec![
                    "topology".to_string(),
                    "telemetry".to_string(),
                    "runbooks".to_string(),
                    "tickets".to_string(),
                ],
            },
        );
        map
    }

    pub fn resolve(&self, scenario: &str) -> Result<&ScenarioConfig, ApiError> {
        self.scenarios
            .get(scenario)
            .ok_or_else(|| ApiError::Validation(format!("unknown scenario: {scenario}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_the_default_scenario() {
        let registry = ScenarioRegistry {
            scenarios: ScenarioRegistry::defaults(),
        };
        let config = registry.resolve("default").unwrap();
        assert_eq!(config.orchestrator_agent_id, "orchestrator-default");
        assert_eq!(config.sub_agent_ids.len(), 4);
    }

    #[test]
    fn unknown_scenario_is_a_validation_error() {
        let registry = ScenarioRegistry {
            scenarios: ScenarioRegistry::defaults(),
        };
        assert!(matches!(
            registry.resolve("nope"),
            Err(ApiError::Validation(_))
        ));
    }
}
