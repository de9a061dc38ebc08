use super::StartupOrchestrator;
use crate::error::ServiceError;
use crate::process::ShutdownScope;
use crate::services::{ManagedService, LLAMA, VECTOR_DB};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

impl StartupOrchestrator {
    /// Tear everything down. Never fails; problems are logged.
    ///
    /// The health ticker is stopped first so no check races the teardown.
    /// Each service is then asked to stop independently, bounded by the
    /// shutdown config, and finally the process controller terminates
    /// tracked processes and marks every service stopped.
    pub async fn shutdown(&self) {
        info!("Shutting down managed services");

        let live_attempt = self.cancellation.lock().clone();
        if let Some(token) = live_attempt {
            token.cancel();
        }

        self.health_monitor.stop();
        self.health_check_state.reset();

        let limit = self.service_shutdown_timeout;
        let (vector_db, llama) = tokio::join!(
            bounded_shutdown(self.vector_db.as_ref(), limit),
            bounded_shutdown(self.llama.as_ref(), limit)
        );

        for (service, result) in [(VECTOR_DB, vector_db), (LLAMA, llama)] {
            match result {
                Some(Ok(())) => info!("Service '{}' shut down", service),
                Some(Err(e)) => error!("Service '{}' failed to shut down: {}", service, e),
                None => warn!(
                    "Service '{}' did not shut down within {:?}, continuing",
                    service, limit
                ),
            }
        }

        self.process_controller
            .shutdown(ShutdownScope {
                service_processes: &self.processes,
                service_status: &self.registry,
                health_monitor: Some(&self.health_monitor),
                health_check_state: Some(&self.health_check_state),
            })
            .await;

        info!("Shutdown complete");
    }
}

/// `None` when the service did not finish within `limit`
async fn bounded_shutdown(
    service: &dyn ManagedService,
    limit: Duration,
) -> Option<Result<(), ServiceError>> {
    timeout(limit, service.shutdown()).await.ok()
}
