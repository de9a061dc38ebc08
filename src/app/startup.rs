use super::types::{
    ModelAvailability, ServiceInitReport, ServiceOutcome, StartupReport, StartupState,
};
use super::StartupOrchestrator;
use crate::error::{ServiceError, StartupError};
use crate::events::{details, ErrorRecord, StartupPhase};
use crate::health::HealthCheckState;
use crate::services::{ManagedService, MigrationProgress, LLAMA, VECTOR_DB};
use crate::status::{ServiceHealth, ServiceRegistry, ServiceStatus};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Clears the attempt's token on every exit path, including a dropped future
struct AttemptGuard<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.slot.lock().take();
    }
}

impl StartupOrchestrator {
    /// Run the startup sequence, bounded by the configured timeout.
    ///
    /// Only cancellation and timeout fail an attempt. Both paths tear down
    /// whatever came up before the error is returned.
    pub async fn startup(&self) -> Result<StartupReport, StartupError> {
        let token = {
            let mut slot = self.cancellation.lock();
            if slot.is_some() {
                warn!("Rejecting startup: an attempt is already in progress");
                return Err(StartupError::AlreadyInProgress);
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };
        let _guard = AttemptGuard {
            slot: &self.cancellation,
        };

        let attempt = Uuid::new_v4();
        let timeout = self.startup_config.timeout();
        let started = Instant::now();
        info!("Starting startup attempt {} (timeout {:?})", attempt, timeout);

        self.set_state(StartupState::Running);

        let outcome = tokio::select! {
            result = self.run_startup_sequence(&token) => result,
            _ = tokio::time::sleep(timeout) => {
                token.cancel();
                Err(StartupError::Timeout { timeout })
            }
        };

        match outcome {
            Ok(services) => {
                self.set_state(StartupState::Completed);
                self.emit_progress(
                    StartupPhase::Ready,
                    "All services ready",
                    100,
                    details([("all_services", Value::Bool(services.all_succeeded()))]),
                );
                self.start_health_monitoring();

                let elapsed = started.elapsed();
                info!("Startup attempt {} completed in {:?}", attempt, elapsed);

                Ok(StartupReport {
                    services,
                    models: self.progress.lock().models.clone(),
                    elapsed,
                })
            }
            Err(e) => {
                error!("Startup attempt {} failed: {}", attempt, e);
                let failed_phase = self.current_phase();

                self.shutdown().await;

                self.record_error(ErrorRecord::new(failed_phase, e.to_string(), true));
                self.set_state(StartupState::Failed);
                self.emit_progress(
                    StartupPhase::Failed,
                    &format!("Startup failed: {}", e),
                    self.last_progress(),
                    details([
                        ("critical", Value::Bool(true)),
                        ("error", Value::String(e.to_string())),
                    ]),
                );

                Err(e)
            }
        }
    }

    /// Cancel the in-flight startup attempt, if any.
    ///
    /// The attempt fails with `Cancelled` at its next phase boundary.
    pub fn cancel_startup(&self) -> bool {
        match self.cancellation.lock().as_ref() {
            Some(token) => {
                info!("Cancelling startup");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub(super) async fn run_startup_sequence(
        &self,
        token: &CancellationToken,
    ) -> Result<ServiceInitReport, StartupError> {
        self.emit_progress(StartupPhase::Starting, "Starting up", 0, Map::new());

        ensure_active(token)?;
        self.run_migration(token).await;

        ensure_active(token)?;
        let services = self.initialize_services(token).await;

        ensure_active(token)?;
        self.check_model_availability().await;

        ensure_active(token)?;
        self.initialize_app_services();

        Ok(services)
    }

    async fn run_migration(&self, token: &CancellationToken) {
        let Some(migration) = &self.migration else {
            self.emit_progress(
                StartupPhase::Migration,
                "No migration configured",
                15,
                Map::new(),
            );
            return;
        };

        self.emit_progress(
            StartupPhase::Migration,
            "Checking for pending migrations",
            5,
            Map::new(),
        );

        let result = match migration.needs_migration().await {
            Ok(false) => {
                debug!("No migration needed");
                self.emit_progress(StartupPhase::Migration, "No migration needed", 15, Map::new());
                return;
            }
            Ok(true) => {
                info!("Running data migration");
                // Migration progress maps onto 5..=15 of the overall bar
                let forward = |update: MigrationProgress| {
                    let percent = 5 + update.percent.min(100) / 10;
                    self.emit_progress(
                        StartupPhase::Migration,
                        &update.message,
                        percent,
                        details([("migration_percent", Value::from(update.percent))]),
                    );
                };
                migration.migrate(token, &forward).await
            }
            Err(e) => Err(e),
        };

        let failure = match result {
            Ok(report) if report.success => {
                info!("Migration completed");
                self.emit_progress(StartupPhase::Migration, "Migration complete", 15, Map::new());
                return;
            }
            Ok(report) if report.errors.is_empty() => "Migration reported failure".to_string(),
            Ok(report) => report.errors.join("; "),
            Err(e) => e.to_string(),
        };

        warn!("Migration failed, continuing startup: {}", failure);
        self.record_error(ErrorRecord::new(StartupPhase::Migration, failure.clone(), false));
        self.emit_progress(
            StartupPhase::Migration,
            "Migration finished with errors",
            15,
            details([
                ("warning", Value::Bool(true)),
                ("error", Value::String(failure)),
            ]),
        );
    }

    /// Bring both services up concurrently and wait for both to settle.
    ///
    /// Never fails; outcomes land in the registry and the returned report.
    pub async fn initialize_services(&self, token: &CancellationToken) -> ServiceInitReport {
        self.emit_progress(StartupPhase::Services, "Starting services", 20, Map::new());

        let (vector_db, llama) = tokio::join!(
            self.bring_up_vector_db(token),
            self.bring_up_llama(token)
        );

        let message = if vector_db.success {
            "Vector database ready"
        } else {
            "Vector database failed to start"
        };
        self.emit_progress(StartupPhase::Services, message, 35, Map::new());

        let message = if llama.success {
            "Inference runtime ready"
        } else {
            "Inference runtime unavailable"
        };
        self.emit_progress(StartupPhase::Services, message, 45, Map::new());

        let report = ServiceInitReport { vector_db, llama };
        let message = if report.all_succeeded() {
            "All services started"
        } else {
            "Services started with failures"
        };
        self.emit_progress(StartupPhase::Services, message, 60, Map::new());

        report
    }

    async fn bring_up_vector_db(&self, token: &CancellationToken) -> ServiceOutcome {
        if token.is_cancelled() {
            return cancelled_outcome(VECTOR_DB, false);
        }

        match self.vector_db.initialize(token).await {
            Ok(()) => {
                self.registry
                    .set_state(VECTOR_DB, ServiceStatus::Running, ServiceHealth::Healthy);
                info!("Vector database started");
                ServiceOutcome::succeeded()
            }
            Err(e @ ServiceError::Cancelled { .. }) if token.is_cancelled() => {
                ServiceOutcome::failed(e.to_string(), false)
            }
            Err(e) => {
                self.registry
                    .set_state(VECTOR_DB, ServiceStatus::Failed, ServiceHealth::Unhealthy);
                error!("Vector database failed to start: {}", e);
                self.record_error(ErrorRecord::new(StartupPhase::Services, e.to_string(), true));
                ServiceOutcome::failed(e.to_string(), false)
            }
        }
    }

    async fn bring_up_llama(&self, token: &CancellationToken) -> ServiceOutcome {
        if token.is_cancelled() {
            return cancelled_outcome(LLAMA, true);
        }

        match self.llama.initialize(token).await {
            Ok(()) => {
                self.registry
                    .set_state(LLAMA, ServiceStatus::Running, ServiceHealth::Healthy);
                if let Some(backend) = self
                    .llama
                    .status_summary()
                    .await
                    .and_then(|summary| summary.active_backend)
                {
                    info!("Inference runtime started with backend {}", backend);
                    self.registry
                        .set_extra(LLAMA, "active_backend", Value::String(backend));
                } else {
                    info!("Inference runtime started");
                }
                ServiceOutcome::succeeded()
            }
            Err(e @ ServiceError::Cancelled { .. }) if token.is_cancelled() => {
                ServiceOutcome::failed(e.to_string(), true)
            }
            Err(e) => {
                self.registry
                    .set_state(LLAMA, ServiceStatus::Failed, ServiceHealth::Unhealthy);
                warn!("Inference runtime failed to start, continuing degraded: {}", e);
                self.record_error(ErrorRecord::new(StartupPhase::Services, e.to_string(), false));
                ServiceOutcome::failed(e.to_string(), true)
            }
        }
    }

    /// Check the selected models against the local inventory.
    ///
    /// Never fails. On collaborator errors a warning event is emitted and the
    /// previous result is kept.
    pub async fn check_model_availability(&self) -> Option<ModelAvailability> {
        self.emit_progress(
            StartupPhase::Models,
            "Checking model availability",
            65,
            Map::new(),
        );

        let inventory = async {
            let selection = self.model_registry.get_config().await?;
            let available = self.model_registry.list_models().await?;
            Ok::<_, ServiceError>((selection, available))
        };

        let (selection, available) = match inventory.await {
            Ok(inventory) => inventory,
            Err(e) => {
                warn!("Model availability check failed: {}", e);
                self.emit_progress(
                    StartupPhase::Models,
                    "Could not check model availability",
                    75,
                    details([
                        ("warning", Value::Bool(true)),
                        ("error", Value::String(e.to_string())),
                    ]),
                );
                return None;
            }
        };

        let result = ModelAvailability::evaluate(&selection, &self.model_config, &available);
        if result.models_available {
            info!(
                "Required models available (vision: {})",
                result.vision_available
            );
        } else {
            warn!("Missing models: {}", result.missing_models.join(", "));
        }

        let message = if result.models_available {
            "Required models available".to_string()
        } else {
            format!("Missing models: {}", result.missing_models.join(", "))
        };
        self.progress.lock().models = Some(result.clone());
        self.emit_progress(
            StartupPhase::Models,
            &message,
            75,
            details([
                ("models_available", Value::Bool(result.models_available)),
                ("vision_available", Value::Bool(result.vision_available)),
            ]),
        );

        Some(result)
    }

    fn initialize_app_services(&self) {
        self.emit_progress(
            StartupPhase::AppServices,
            "Starting application services",
            85,
            Map::new(),
        );
    }

    /// Start (or restart) the periodic health ticker
    pub fn start_health_monitoring(&self) {
        let registry = Arc::clone(&self.registry);
        let llama = Arc::clone(&self.llama);
        let state = Arc::clone(&self.health_check_state);

        self.health_monitor
            .start(self.startup_config.health_check_interval(), move || {
                let registry = Arc::clone(&registry);
                let llama = Arc::clone(&llama);
                let state = Arc::clone(&state);
                async move { run_health_checks(&registry, llama.as_ref(), &state).await }
            });
    }
}

fn ensure_active(token: &CancellationToken) -> Result<(), StartupError> {
    if token.is_cancelled() {
        return Err(StartupError::Cancelled);
    }
    Ok(())
}

fn cancelled_outcome(service: &str, non_critical: bool) -> ServiceOutcome {
    debug!("Skipping {} bring-up: startup cancelled", service);
    let error = ServiceError::Cancelled {
        service: service.to_string(),
    };
    ServiceOutcome::failed(error.to_string(), non_critical)
}

/// One health tick. Skipped while a previous tick is still running.
pub(super) async fn run_health_checks(
    registry: &ServiceRegistry,
    llama: &dyn ManagedService,
    state: &HealthCheckState,
) {
    let Some(_claim) = state.claim() else {
        debug!("Previous health check still running, skipping");
        return;
    };

    match llama.check_connection().await {
        Some(true) => registry.set_health(LLAMA, ServiceHealth::Healthy),
        Some(false) => {
            warn!("Inference runtime failed its health check");
            registry.set_health(LLAMA, ServiceHealth::Unhealthy);
        }
        None => debug!("Inference runtime has no health probe"),
    }

    // The vector index has no probe; running counts as healthy
    if registry.status(VECTOR_DB) == Some(ServiceStatus::Running) {
        registry.set_health(VECTOR_DB, ServiceHealth::Healthy);
    }
}
