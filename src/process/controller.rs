use super::{
    platform_terminator, ProcessEvent, ProcessEventKind, ProcessHandle, ProcessTable, Signal,
    Terminator,
};
use crate::config::ShutdownConfig;
use crate::health::{HealthCheckState, HealthMonitor};
use crate::status::ServiceRegistry;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Everything a full teardown touches
pub struct ShutdownScope<'a> {
    pub service_processes: &'a ProcessTable,
    pub service_status: &'a ServiceRegistry,
    pub health_monitor: Option<&'a HealthMonitor>,
    pub health_check_state: Option<&'a HealthCheckState>,
}

/// Stops OS processes: SIGTERM, wait out the grace period, then force kill
pub struct ProcessShutdownController {
    grace_period: Duration,
    terminator: Arc<dyn Terminator>,
}

impl ProcessShutdownController {
    pub fn new(config: &ShutdownConfig) -> Self {
        Self::with_terminator(
            config.grace_period(),
            platform_terminator(config.force_kill_timeout()),
        )
    }

    pub fn with_terminator(grace_period: Duration, terminator: Arc<dyn Terminator>) -> Self {
        Self {
            grace_period,
            terminator,
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Stop one process. Safe to call repeatedly and never fails; every
    /// listener on the handle is gone when this returns.
    pub async fn shutdown_process(&self, name: &str, handle: Option<&dyn ProcessHandle>) {
        let Some(handle) = handle else {
            debug!("No process handle for '{}', nothing to stop", name);
            return;
        };

        let Some(pid) = handle.pid() else {
            debug!("Process '{}' has no pid, nothing to stop", name);
            return;
        };

        if handle.killed() || handle.exit_code().is_some() {
            debug!("Process '{}' ({}) already stopped", name, pid);
            return;
        }

        for kind in ProcessEventKind::ALL {
            handle.unsubscribe_all(Some(kind));
        }

        let (exit_tx, exit_rx) = oneshot::channel::<ProcessEvent>();
        let exit_tx = Arc::new(Mutex::new(Some(exit_tx)));
        for kind in [ProcessEventKind::Exit, ProcessEventKind::Error] {
            let exit_tx = Arc::clone(&exit_tx);
            handle.subscribe(
                kind,
                Arc::new(move |event: &ProcessEvent| {
                    if let Some(tx) = exit_tx.lock().take() {
                        let _ = tx.send(event.clone());
                    }
                }),
            );
        }

        if handle.exit_code().is_some() {
            debug!("Process '{}' ({}) exited before it was signalled", name, pid);
            handle.unsubscribe_all(None);
            return;
        }

        info!("Stopping process '{}' (pid {})", name, pid);
        if let Err(e) = handle.kill(Signal::Terminate) {
            if e.is_not_found() {
                debug!("Process '{}' ({}) already gone: {}", name, pid, e);
                handle.unsubscribe_all(None);
                return;
            }
            warn!("Failed to send SIGTERM to '{}' ({}): {}", name, pid, e);
        }

        match tokio::time::timeout(self.grace_period, exit_rx).await {
            Ok(Ok(ProcessEvent::Error(e))) if e.is_not_found() => {
                debug!("Process '{}' ({}) vanished during shutdown: {}", name, pid, e);
            }
            Ok(Ok(ProcessEvent::Error(e))) => {
                error!("Process '{}' ({}) reported an error during shutdown: {}", name, pid, e);
            }
            Ok(Ok(event)) => {
                info!("Process '{}' ({}) stopped: {:?}", name, pid, event);
            }
            Ok(Err(_)) => {
                debug!("Exit listeners for '{}' ({}) were removed elsewhere", name, pid);
            }
            Err(_) => {
                warn!(
                    "Process '{}' ({}) did not exit within {:?}, forcing termination",
                    name, pid, self.grace_period
                );
                match self.terminator.force_kill(pid, handle).await {
                    Ok(()) => info!("Process '{}' ({}) force killed", name, pid),
                    Err(e) if e.is_not_found() => {
                        debug!("Process '{}' ({}) exited before force kill", name, pid)
                    }
                    Err(e) => error!("Force kill of '{}' ({}) failed: {}", name, pid, e),
                }
            }
        }

        handle.unsubscribe_all(None);
    }

    /// Full teardown: stop the health ticker, stop every tracked process
    /// concurrently, forget them and mark all services stopped.
    pub async fn shutdown(&self, scope: ShutdownScope<'_>) {
        if let Some(monitor) = scope.health_monitor {
            monitor.stop();
        }

        if let Some(state) = scope.health_check_state {
            state.reset();
        }

        let processes = scope.service_processes.entries();
        let count = processes.len();
        info!("Stopping {} supervised processes", count);

        join_all(
            processes
                .iter()
                .map(|(name, handle)| self.shutdown_process(name, Some(handle.as_ref()))),
        )
        .await;

        scope.service_processes.clear();
        scope.service_status.reset_stopped();

        info!("Process shutdown complete");
    }
}
