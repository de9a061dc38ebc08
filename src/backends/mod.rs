//! Concrete collaborators used by the `lifeline` binary.
//!
//! The orchestrator only sees the traits in [`crate::services`]; these
//! implementations back them with OS processes and the local model folder.

mod model_directory;
mod process_service;

pub use model_directory::ModelDirectory;
pub use process_service::ProcessService;
