use super::types::{ModelAvailability, StartupState};
use crate::config::{LifelineConfig, ModelConfig, ShutdownConfig, StartupConfig};
use crate::error::StartupError;
use crate::events::{ErrorRecord, ProgressCallback, StartupPhase};
use crate::health::{HealthCheckState, HealthMonitor};
use crate::process::{ProcessShutdownController, ProcessTable};
use crate::services::{ManagedService, MigrationService, ModelRegistry, LLAMA, VECTOR_DB};
use crate::status::ServiceRegistry;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Mutable progress of the current (or last) startup attempt
pub(super) struct StartupProgress {
    pub(super) state: StartupState,
    pub(super) phase: StartupPhase,
    pub(super) percent: u8,
    pub(super) models: Option<ModelAvailability>,
}

/// Brings the managed services up in phases and tears them down again
pub struct StartupOrchestrator {
    pub(super) startup_config: StartupConfig,
    pub(super) model_config: ModelConfig,

    // Collaborators
    pub(super) vector_db: Arc<dyn ManagedService>,
    pub(super) llama: Arc<dyn ManagedService>,
    pub(super) migration: Option<Arc<dyn MigrationService>>,
    pub(super) model_registry: Arc<dyn ModelRegistry>,

    // Supervision
    pub(super) registry: Arc<ServiceRegistry>,
    pub(super) processes: ProcessTable,
    pub(super) process_controller: Arc<ProcessShutdownController>,
    pub(super) service_shutdown_timeout: Duration,
    pub(super) health_monitor: HealthMonitor,
    pub(super) health_check_state: Arc<HealthCheckState>,

    // Lifecycle management
    pub(super) progress: Mutex<StartupProgress>,
    pub(super) errors: Mutex<Vec<ErrorRecord>>,
    pub(super) progress_callback: RwLock<Option<ProgressCallback>>,
    pub(super) cancellation: Mutex<Option<CancellationToken>>,
}

impl StartupOrchestrator {
    pub fn builder() -> StartupOrchestratorBuilder {
        StartupOrchestratorBuilder::default()
    }

    /// Status registry shared with the health ticker
    pub fn registry(&self) -> Arc<ServiceRegistry> {
        Arc::clone(&self.registry)
    }

    /// Processes torn down by `shutdown`
    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }
}

/// Builder for [`StartupOrchestrator`]
#[derive(Default)]
pub struct StartupOrchestratorBuilder {
    startup_config: Option<StartupConfig>,
    shutdown_config: Option<ShutdownConfig>,
    model_config: Option<ModelConfig>,
    vector_db: Option<Arc<dyn ManagedService>>,
    llama: Option<Arc<dyn ManagedService>>,
    migration: Option<Arc<dyn MigrationService>>,
    model_registry: Option<Arc<dyn ModelRegistry>>,
    processes: Option<ProcessTable>,
    process_controller: Option<Arc<ProcessShutdownController>>,
}

impl StartupOrchestratorBuilder {
    /// Take the startup, shutdown and model sections from a loaded config
    pub fn with_config(mut self, config: &LifelineConfig) -> Self {
        self.startup_config = Some(config.startup.clone());
        self.shutdown_config = Some(config.shutdown.clone());
        self.model_config = Some(config.models.clone());
        self
    }

    pub fn with_startup_config(mut self, config: StartupConfig) -> Self {
        self.startup_config = Some(config);
        self
    }

    pub fn with_shutdown_config(mut self, config: ShutdownConfig) -> Self {
        self.shutdown_config = Some(config);
        self
    }

    pub fn with_model_config(mut self, config: ModelConfig) -> Self {
        self.model_config = Some(config);
        self
    }

    pub fn with_vector_db(mut self, service: Arc<dyn ManagedService>) -> Self {
        self.vector_db = Some(service);
        self
    }

    pub fn with_llama(mut self, service: Arc<dyn ManagedService>) -> Self {
        self.llama = Some(service);
        self
    }

    pub fn with_migration(mut self, migration: Arc<dyn MigrationService>) -> Self {
        self.migration = Some(migration);
        self
    }

    pub fn with_model_registry(mut self, registry: Arc<dyn ModelRegistry>) -> Self {
        self.model_registry = Some(registry);
        self
    }

    /// Share a process table with the services that spawn processes
    pub fn with_processes(mut self, processes: ProcessTable) -> Self {
        self.processes = Some(processes);
        self
    }

    pub fn with_process_controller(mut self, controller: Arc<ProcessShutdownController>) -> Self {
        self.process_controller = Some(controller);
        self
    }

    pub fn build(self) -> Result<StartupOrchestrator, StartupError> {
        let vector_db = self
            .vector_db
            .ok_or(StartupError::MissingCollaborator(VECTOR_DB))?;
        let llama = self.llama.ok_or(StartupError::MissingCollaborator(LLAMA))?;
        let model_registry = self
            .model_registry
            .ok_or(StartupError::MissingCollaborator("model_registry"))?;

        let shutdown_config = self.shutdown_config.unwrap_or_default();
        let process_controller = self
            .process_controller
            .unwrap_or_else(|| Arc::new(ProcessShutdownController::new(&shutdown_config)));

        Ok(StartupOrchestrator {
            startup_config: self.startup_config.unwrap_or_default(),
            model_config: self.model_config.unwrap_or_default(),
            vector_db,
            llama,
            migration: self.migration,
            model_registry,
            registry: Arc::new(ServiceRegistry::new([VECTOR_DB, LLAMA])),
            processes: self.processes.unwrap_or_default(),
            process_controller,
            service_shutdown_timeout: shutdown_config.service_shutdown_timeout(),
            health_monitor: HealthMonitor::new(),
            health_check_state: Arc::new(HealthCheckState::new()),
            progress: Mutex::new(StartupProgress {
                state: StartupState::Initializing,
                phase: StartupPhase::Starting,
                percent: 0,
                models: None,
            }),
            errors: Mutex::new(Vec::new()),
            progress_callback: RwLock::new(None),
            cancellation: Mutex::new(None),
        })
    }
}
