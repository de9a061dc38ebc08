use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LifelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Startup error: {0}")]
    Startup(#[from] StartupError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("System error: {message}")]
    System { message: String },
}

impl LifelineError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

/// Failures that abort a startup attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StartupError {
    #[error("Startup was cancelled")]
    Cancelled,

    #[error("Startup timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("A startup attempt is already in progress")]
    AlreadyInProgress,

    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),
}

/// Failures reported by managed services and startup collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("{service} failed to initialize: {message}")]
    Initialization { service: String, message: String },

    #[error("{service} failed to shut down: {message}")]
    Shutdown { service: String, message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Model inventory unavailable: {message}")]
    Inventory { message: String },

    #[error("{service} initialization was cancelled")]
    Cancelled { service: String },

    #[error("{service} has no command configured")]
    NotConfigured { service: String },
}

impl ServiceError {
    pub fn initialization<S: Into<String>>(service: S, message: S) -> Self {
        Self::Initialization {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn shutdown<S: Into<String>>(service: S, message: S) -> Self {
        Self::Shutdown {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// Failures while signalling or waiting on an OS process
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessError {
    #[error("Process {pid} not found")]
    NotFound { pid: u32 },

    #[error("Failed to signal process {pid}: {message}")]
    Signal { pid: u32, message: String },

    #[error("Failed to spawn {name}: {message}")]
    Spawn { name: String, message: String },

    #[error("Failed waiting on process {pid}: {message}")]
    Wait { pid: u32, message: String },

    #[error("Failed to force kill process {pid}: {message}")]
    ForceKill { pid: u32, message: String },
}

impl ProcessError {
    /// True when the process was already gone (ESRCH and friends)
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProcessError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, LifelineError>;
