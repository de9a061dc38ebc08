pub mod app;
pub mod backends;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod process;
pub mod services;
pub mod status;

#[cfg(test)]
mod testing;

pub use app::{
    ModelAvailability, ServiceInitReport, ServiceOutcome, ServiceStatusReport, StartupOrchestrator,
    StartupOrchestratorBuilder, StartupReport, StartupState,
};
pub use backends::{ModelDirectory, ProcessService};
pub use config::LifelineConfig;
pub use error::{LifelineError, ProcessError, Result, ServiceError, StartupError};
pub use events::{ErrorRecord, ProgressCallback, ProgressEvent, StartupPhase};
pub use health::{HealthCheckState, HealthMonitor};
pub use process::{ProcessHandle, ProcessShutdownController, ProcessTable, ShutdownScope};
pub use services::{ManagedService, MigrationService, ModelRegistry};
pub use status::{ServiceHealth, ServiceRegistry, ServiceStatus, ServiceStatusEntry};
