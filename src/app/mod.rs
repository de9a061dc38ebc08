mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use orchestrator::{StartupOrchestrator, StartupOrchestratorBuilder};
pub use runtime::wait_for_shutdown_signal;
pub use types::{
    ModelAvailability, ServiceInitReport, ServiceOutcome, ServiceStatusReport, StartupReport,
    StartupState,
};

/// Why the process is shutting down
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
}
