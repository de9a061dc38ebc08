use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Guards against overlapping health checks
#[derive(Debug, Default)]
pub struct HealthCheckState {
    in_progress: AtomicBool,
}

impl HealthCheckState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the check slot; false when a check is already running
    pub fn try_begin(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the check slot for the lifetime of the returned guard
    pub fn claim(&self) -> Option<HealthCheckClaim<'_>> {
        self.try_begin().then(|| HealthCheckClaim { state: self })
    }

    pub fn finish(&self) {
        self.in_progress.store(false, Ordering::Release);
    }

    pub fn reset(&self) {
        self.finish();
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }
}

/// Releases the check slot when dropped, including when a tick is aborted
/// mid-check
pub struct HealthCheckClaim<'a> {
    state: &'a HealthCheckState,
}

impl Drop for HealthCheckClaim<'_> {
    fn drop(&mut self) {
        self.state.finish();
    }
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic health ticker owned by the orchestrator.
///
/// At most one ticker runs at a time; `start` replaces a running one and
/// `stop` is idempotent. The first tick fires one period after `start`.
#[derive(Default)]
pub struct HealthMonitor {
    task: Mutex<Option<MonitorTask>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start<F, Fut>(&self, period: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(first_tick) = Instant::now().checked_add(period) else {
            warn!("Health check period {:?} is out of range, monitoring disabled", period);
            self.stop();
            return;
        };

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = task_cancel.cancelled() => break,
                            _ = tick() => {}
                        }
                    }
                }
            }

            debug!("Health ticker exited");
        });

        let previous = self.task.lock().replace(MonitorTask { cancel, handle });
        if let Some(previous) = previous {
            debug!("Replacing running health ticker");
            previous.cancel.cancel();
            previous.handle.abort();
        }

        info!("Health monitoring started with period {:?}", period);
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.cancel.cancel();
            task.handle.abort();
            info!("Health monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}
