use crate::status::ServiceStatusEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Phases reported while the system starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartupPhase {
    Starting,
    Migration,
    Services,
    Models,
    AppServices,
    Ready,
    Failed,
}

impl StartupPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartupPhase::Starting => "starting",
            StartupPhase::Migration => "migration",
            StartupPhase::Services => "services",
            StartupPhase::Models => "models",
            StartupPhase::AppServices => "app-services",
            StartupPhase::Ready => "ready",
            StartupPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for StartupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error captured during startup, kept for the lifetime of the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub phase: StartupPhase,
    pub error: String,
    pub critical: bool,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new<S: Into<String>>(phase: StartupPhase, error: S, critical: bool) -> Self {
        Self {
            phase,
            error: error.into(),
            critical,
            timestamp: Utc::now(),
        }
    }
}

/// Transient progress notification delivered to the registered callback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: StartupPhase,
    pub message: String,
    /// 0..=100
    pub progress: u8,
    pub service_status: BTreeMap<String, ServiceStatusEntry>,
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl ProgressEvent {
    pub fn is_warning(&self) -> bool {
        self.flag("warning")
    }

    pub fn is_critical(&self) -> bool {
        self.flag("critical")
    }

    fn flag(&self, key: &str) -> bool {
        self.details
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Build a details map from key/value pairs
pub fn details<I>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
