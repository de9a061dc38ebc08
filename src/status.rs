use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Lifecycle status of a managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    NotStarted,
    Running,
    Failed,
    Stopped,
}

/// Last known health of a managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatusEntry {
    pub status: ServiceStatus,
    pub health: ServiceHealth,
    #[serde(default)]
    pub extras: Map<String, Value>,
}

impl ServiceStatusEntry {
    fn new() -> Self {
        Self {
            status: ServiceStatus::NotStarted,
            health: ServiceHealth::Unknown,
            extras: Map::new(),
        }
    }
}

/// Status map over a fixed set of service names.
///
/// The key set is fixed at construction. Updates addressed to unknown names
/// are dropped, so phases can only change values, never the set of services.
pub struct ServiceRegistry {
    entries: RwLock<BTreeMap<String, ServiceStatusEntry>>,
}

impl ServiceRegistry {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = names
            .into_iter()
            .map(|name| (name.into(), ServiceStatusEntry::new()))
            .collect();

        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Apply `f` to the entry for `name`; returns false when the name is unknown
    pub fn update<F>(&self, name: &str, f: F) -> bool
    where
        F: FnOnce(&mut ServiceStatusEntry),
    {
        let mut entries = self.entries.write();
        match entries.get_mut(name) {
            Some(entry) => {
                f(entry);
                true
            }
            None => {
                warn!("Ignoring status update for unknown service '{}'", name);
                false
            }
        }
    }

    pub fn set_state(&self, name: &str, status: ServiceStatus, health: ServiceHealth) {
        if self.update(name, |entry| {
            entry.status = status;
            entry.health = health;
        }) {
            debug!(
                "Service '{}' status changed to {:?}/{:?}",
                name, status, health
            );
        }
    }

    pub fn set_health(&self, name: &str, health: ServiceHealth) {
        self.update(name, |entry| entry.health = health);
    }

    pub fn set_extra(&self, name: &str, key: &str, value: Value) {
        self.update(name, |entry| {
            entry.extras.insert(key.to_string(), value);
        });
    }

    pub fn get(&self, name: &str) -> Option<ServiceStatusEntry> {
        self.entries.read().get(name).cloned()
    }

    pub fn status(&self, name: &str) -> Option<ServiceStatus> {
        self.entries.read().get(name).map(|entry| entry.status)
    }

    pub fn snapshot(&self) -> BTreeMap<String, ServiceStatusEntry> {
        self.entries.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Mark every service stopped with unknown health
    pub fn reset_stopped(&self) {
        let mut entries = self.entries.write();
        for entry in entries.values_mut() {
            entry.status = ServiceStatus::Stopped;
            entry.health = ServiceHealth::Unknown;
        }
    }
}
