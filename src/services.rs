//! Contracts the orchestrator consumes from the services it supervises.
//!
//! Implementations own their own I/O. The orchestrator only calls these
//! methods and folds the outcomes into its status registry.

use crate::error::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Service name of the vector index engine in the status registry
pub const VECTOR_DB: &str = "vector_db";

/// Service name of the local inference runtime in the status registry
pub const LLAMA: &str = "llama";

/// Summary a service may report once it is up
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub active_backend: Option<String>,
}

/// A subsystem with an initialize/shutdown lifecycle.
///
/// `initialize` receives the startup attempt's cancellation token. The
/// orchestrator never aborts the call itself; implementations decide whether
/// to watch the token and bail out early. The same holds for `migrate`.
#[async_trait]
pub trait ManagedService: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self, cancel: &CancellationToken) -> Result<(), ServiceError>;

    async fn shutdown(&self) -> Result<(), ServiceError>;

    /// Connectivity probe; `None` means the service has no probe
    async fn check_connection(&self) -> Option<bool> {
        None
    }

    async fn status_summary(&self) -> Option<ServiceSummary> {
        None
    }
}

/// Progress reported by a running migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationProgress {
    pub message: String,
    /// Percent complete within the migration itself
    pub percent: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[async_trait]
pub trait MigrationService: Send + Sync {
    async fn needs_migration(&self) -> Result<bool, ServiceError>;

    async fn migrate(
        &self,
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(MigrationProgress) + Send + Sync),
    ) -> Result<MigrationReport, ServiceError>;
}

/// Models the application is configured to use
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub text_model: Option<String>,
    pub embedding_model: Option<String>,
    pub vision_model: Option<String>,
    pub vision_projector: Option<String>,
}

/// A locally available model as listed by the inventory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: Option<String>,
    pub filename: Option<String>,
}

impl ModelEntry {
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            name: Some(name.into()),
            filename: None,
        }
    }

    /// The identifier used for availability checks: name, else filename
    pub fn identifier(&self) -> Option<&str> {
        self.name.as_deref().or(self.filename.as_deref())
    }
}

#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn get_config(&self) -> Result<ModelSelection, ServiceError>;

    async fn list_models(&self) -> Result<Vec<ModelEntry>, ServiceError>;
}
