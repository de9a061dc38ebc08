use super::types::{ServiceStatusReport, StartupState};
use super::StartupOrchestrator;
use crate::events::{ErrorRecord, ProgressCallback, ProgressEvent, StartupPhase};
use crate::services::LLAMA;
use crate::status::ServiceStatus;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

impl StartupOrchestrator {
    /// Aggregate status for callers and UIs
    pub fn get_service_status(&self) -> ServiceStatusReport {
        let (startup, phase, models) = {
            let progress = self.progress.lock();
            (progress.state, progress.phase, progress.models.clone())
        };

        ServiceStatusReport {
            startup,
            phase,
            services: self.registry.snapshot(),
            errors: self.errors(),
            degraded: self.registry.status(LLAMA) == Some(ServiceStatus::Failed),
            models,
        }
    }

    /// Register the progress consumer, replacing any previous one
    pub fn set_progress_callback<F>(&self, callback: F)
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let callback: ProgressCallback = Arc::new(callback);
        *self.progress_callback.write() = Some(callback);
    }

    pub fn state(&self) -> StartupState {
        self.progress.lock().state
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.errors.lock().clone()
    }

    pub(super) fn set_state(&self, state: StartupState) {
        let mut progress = self.progress.lock();
        debug!("Startup state changed: {:?} -> {:?}", progress.state, state);
        progress.state = state;
    }

    pub(super) fn current_phase(&self) -> StartupPhase {
        self.progress.lock().phase
    }

    pub(super) fn record_error(&self, record: ErrorRecord) {
        self.errors.lock().push(record);
    }

    pub(super) fn emit_progress(
        &self,
        phase: StartupPhase,
        message: &str,
        progress: u8,
        details: Map<String, Value>,
    ) {
        {
            let mut current = self.progress.lock();
            current.phase = phase;
            current.percent = progress;
        }

        // Clone the callback out so it never runs under the lock
        let Some(callback) = self.progress_callback.read().clone() else {
            return;
        };

        let event = ProgressEvent {
            phase,
            message: message.to_string(),
            progress: progress.min(100),
            service_status: self.registry.snapshot(),
            errors: self.errors(),
            details,
        };

        callback(&event);
    }

    pub(super) fn last_progress(&self) -> u8 {
        self.progress.lock().percent
    }
}
