use super::{ShutdownReason, StartupOrchestrator};
use crate::error::{LifelineError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

impl StartupOrchestrator {
    /// Start up, serve until SIGINT/SIGTERM, then shut down.
    ///
    /// Returns the process exit code: 0 after a clean run, 1 when startup
    /// failed.
    pub async fn run(&self) -> Result<i32> {
        if let Err(e) = self.startup().await {
            error!("Startup failed: {}", e);
            return Ok(1);
        }

        info!("lifeline is running");

        let shutdown_reason = wait_for_shutdown_signal().await?;
        info!("Shutdown initiated: {:?}", shutdown_reason);

        self.shutdown().await;

        info!("lifeline shutdown complete");
        Ok(0)
    }
}

/// Resolve on the first SIGTERM (unix) or Ctrl+C
pub async fn wait_for_shutdown_signal() -> Result<ShutdownReason> {
    let (shutdown_sender, shutdown_receiver) = oneshot::channel();
    let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

    // Handle SIGTERM (service manager stop) - Unix only
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                let shutdown_sender = Arc::clone(&shutdown_sender);
                tokio::spawn(async move {
                    if sigterm.recv().await.is_some() {
                        info!("Received SIGTERM signal");
                        if let Some(sender) = shutdown_sender.lock().take() {
                            let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                        }
                    }
                });
            }
            Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
        }
    }

    // Handle SIGINT (Ctrl+C) - Cross-platform
    let sigint_sender = Arc::clone(&shutdown_sender);
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received SIGINT signal (Ctrl+C)");
            if let Some(sender) = sigint_sender.lock().take() {
                let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
            }
        }
    });

    shutdown_receiver
        .await
        .map_err(|_| LifelineError::system("Shutdown channel closed unexpectedly"))
}
