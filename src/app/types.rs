use crate::config::ModelConfig;
use crate::events::{ErrorRecord, StartupPhase};
use crate::services::{ModelEntry, ModelSelection};
use crate::status::ServiceStatusEntry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Orchestrator lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupState {
    Initializing,
    Running,
    Completed,
    Failed,
}

/// Result of one service bring-up
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure the application can run without
    #[serde(default)]
    pub non_critical: bool,
}

impl ServiceOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed<S: Into<String>>(error: S, non_critical: bool) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            non_critical,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInitReport {
    pub vector_db: ServiceOutcome,
    pub llama: ServiceOutcome,
}

impl ServiceInitReport {
    pub fn all_succeeded(&self) -> bool {
        self.vector_db.success && self.llama.success
    }
}

/// Outcome of the model availability check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelAvailability {
    pub models_available: bool,
    pub missing_models: Vec<String>,
    pub vision_available: bool,
    pub required_models: Vec<String>,
}

impl ModelAvailability {
    /// Compare the selected models against what the inventory lists.
    ///
    /// Text and embedding models are required and fall back to the
    /// configured defaults. Vision is optional and only counts when both the
    /// model and its projector are present.
    pub fn evaluate(
        selection: &ModelSelection,
        defaults: &ModelConfig,
        available: &[ModelEntry],
    ) -> Self {
        let available: BTreeSet<&str> =
            available.iter().filter_map(ModelEntry::identifier).collect();

        let required_models = vec![
            pick(&selection.text_model, &defaults.text_model),
            pick(&selection.embedding_model, &defaults.embedding_model),
        ];

        let missing_models: Vec<String> = required_models
            .iter()
            .filter(|name| !available.contains(name.as_str()))
            .cloned()
            .collect();

        let vision_model = pick(&selection.vision_model, &defaults.vision_model);
        let vision_projector = pick(&selection.vision_projector, &defaults.vision_projector);
        let vision_available = !vision_model.is_empty()
            && !vision_projector.is_empty()
            && available.contains(vision_model.as_str())
            && available.contains(vision_projector.as_str());

        Self {
            models_available: missing_models.is_empty(),
            missing_models,
            vision_available,
            required_models,
        }
    }
}

fn pick(selected: &Option<String>, fallback: &str) -> String {
    selected
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Aggregate view returned by `get_service_status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusReport {
    pub startup: StartupState,
    pub phase: StartupPhase,
    pub services: BTreeMap<String, ServiceStatusEntry>,
    pub errors: Vec<ErrorRecord>,
    /// True when the inference runtime failed but the rest is usable
    pub degraded: bool,
    pub models: Option<ModelAvailability>,
}

/// What a successful startup brought up
#[derive(Debug, Clone)]
pub struct StartupReport {
    pub services: ServiceInitReport,
    pub models: Option<ModelAvailability>,
    pub elapsed: Duration,
}
