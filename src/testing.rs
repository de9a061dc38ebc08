//! Test doubles for collaborators and process handles

use crate::error::{ProcessError, ServiceError};
use crate::process::{
    Listener, ListenerSet, ProcessEvent, ProcessEventKind, ProcessHandle, Signal, Terminator,
};
use crate::services::{
    ManagedService, MigrationProgress, MigrationReport, MigrationService, ModelEntry,
    ModelRegistry, ModelSelection, ServiceSummary,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum InitBehavior {
    Succeed,
    Fail(&'static str),
    /// Never completes and ignores the token
    Hang,
    Delay(Duration),
    /// Reports `Cancelled` without the token having been cancelled
    ReportCancelled,
}

pub struct FakeService {
    name: String,
    init: InitBehavior,
    fail_shutdown: bool,
    hang_shutdown: bool,
    check_delay: Option<Duration>,
    connection: Mutex<Option<bool>>,
    backend: Option<String>,
    pub init_calls: AtomicUsize,
    pub shutdown_calls: AtomicUsize,
    pub probe_calls: AtomicUsize,
}

impl FakeService {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            init: InitBehavior::Succeed,
            fail_shutdown: false,
            hang_shutdown: false,
            check_delay: None,
            connection: Mutex::new(None),
            backend: None,
            init_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_init(mut self, init: InitBehavior) -> Self {
        self.init = init;
        self
    }

    pub fn with_backend(mut self, backend: &str) -> Self {
        self.backend = Some(backend.to_string());
        self
    }

    pub fn with_connection(self, connected: Option<bool>) -> Self {
        *self.connection.lock() = connected;
        self
    }

    pub fn failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    pub fn hanging_shutdown(mut self) -> Self {
        self.hang_shutdown = true;
        self
    }

    pub fn with_check_delay(mut self, delay: Duration) -> Self {
        self.check_delay = Some(delay);
        self
    }

    pub fn set_connection(&self, connected: Option<bool>) {
        *self.connection.lock() = connected;
    }

    pub fn init_count(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManagedService for FakeService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, _cancel: &CancellationToken) -> Result<(), ServiceError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        match &self.init {
            InitBehavior::Succeed => Ok(()),
            InitBehavior::Fail(message) => {
                Err(ServiceError::initialization(self.name.as_str(), *message))
            }
            InitBehavior::Hang => std::future::pending().await,
            InitBehavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
            InitBehavior::ReportCancelled => Err(ServiceError::Cancelled {
                service: self.name.clone(),
            }),
        }
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_shutdown {
            std::future::pending::<()>().await;
        }
        if self.fail_shutdown {
            return Err(ServiceError::shutdown(self.name.as_str(), "refused to stop"));
        }
        Ok(())
    }

    async fn check_connection(&self) -> Option<bool> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.check_delay {
            tokio::time::sleep(delay).await;
        }
        *self.connection.lock()
    }

    async fn status_summary(&self) -> Option<ServiceSummary> {
        self.backend.as_ref().map(|backend| ServiceSummary {
            active_backend: Some(backend.clone()),
        })
    }
}

pub struct FakeMigration {
    needs: Result<bool, ServiceError>,
    report: Result<MigrationReport, ServiceError>,
    updates: Vec<MigrationProgress>,
    pub migrate_calls: AtomicUsize,
}

impl FakeMigration {
    pub fn not_needed() -> Self {
        Self::with_report(Ok(MigrationReport {
            success: true,
            errors: Vec::new(),
        }))
        .needs(Ok(false))
    }

    pub fn with_report(report: Result<MigrationReport, ServiceError>) -> Self {
        Self {
            needs: Ok(true),
            report,
            updates: Vec::new(),
            migrate_calls: AtomicUsize::new(0),
        }
    }

    pub fn needs(mut self, needs: Result<bool, ServiceError>) -> Self {
        self.needs = needs;
        self
    }

    pub fn with_updates(mut self, updates: Vec<MigrationProgress>) -> Self {
        self.updates = updates;
        self
    }
}

#[async_trait]
impl MigrationService for FakeMigration {
    async fn needs_migration(&self) -> Result<bool, ServiceError> {
        self.needs.clone()
    }

    async fn migrate(
        &self,
        _cancel: &CancellationToken,
        on_progress: &(dyn Fn(MigrationProgress) + Send + Sync),
    ) -> Result<MigrationReport, ServiceError> {
        self.migrate_calls.fetch_add(1, Ordering::SeqCst);
        for update in &self.updates {
            on_progress(update.clone());
        }
        self.report.clone()
    }
}

pub struct FakeModels {
    selection: Result<ModelSelection, ServiceError>,
    models: Result<Vec<ModelEntry>, ServiceError>,
}

impl FakeModels {
    pub fn new(selection: ModelSelection, available: &[&str]) -> Self {
        Self {
            selection: Ok(selection),
            models: Ok(available.iter().map(|name| ModelEntry::named(*name)).collect()),
        }
    }

    pub fn failing() -> Self {
        Self {
            selection: Ok(ModelSelection::default()),
            models: Err(ServiceError::Inventory {
                message: "inventory offline".to_string(),
            }),
        }
    }
}

#[async_trait]
impl ModelRegistry for FakeModels {
    async fn get_config(&self) -> Result<ModelSelection, ServiceError> {
        self.selection.clone()
    }

    async fn list_models(&self) -> Result<Vec<ModelEntry>, ServiceError> {
        self.models.clone()
    }
}

/// How a fake process reacts to SIGTERM
#[derive(Debug, Clone)]
pub enum OnTerminate {
    ExitAfter(Duration),
    Ignore,
    /// Signal delivery fails with not-found
    Vanish,
    ErrorAfter(Duration, ProcessError),
}

struct FakeProcessInner {
    pid: Option<u32>,
    killed: AtomicBool,
    exit_code: Mutex<Option<i32>>,
    listeners: ListenerSet,
    on_terminate: OnTerminate,
    signals: Mutex<Vec<Signal>>,
}

impl FakeProcessInner {
    fn exit(&self, code: i32) {
        *self.exit_code.lock() = Some(code);
        self.listeners.emit(&ProcessEvent::Exit { code: Some(code) });
    }
}

#[derive(Clone)]
pub struct FakeProcess {
    inner: Arc<FakeProcessInner>,
}

impl FakeProcess {
    pub fn new(pid: u32, on_terminate: OnTerminate) -> Self {
        Self::build(Some(pid), on_terminate)
    }

    pub fn without_pid() -> Self {
        Self::build(None, OnTerminate::Ignore)
    }

    pub fn already_killed(pid: u32) -> Self {
        let process = Self::new(pid, OnTerminate::Ignore);
        process.inner.killed.store(true, Ordering::SeqCst);
        process
    }

    pub fn already_exited(pid: u32, code: i32) -> Self {
        let process = Self::new(pid, OnTerminate::Ignore);
        *process.inner.exit_code.lock() = Some(code);
        process
    }

    fn build(pid: Option<u32>, on_terminate: OnTerminate) -> Self {
        Self {
            inner: Arc::new(FakeProcessInner {
                pid,
                killed: AtomicBool::new(false),
                exit_code: Mutex::new(None),
                listeners: ListenerSet::new(),
                on_terminate,
                signals: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.inner.signals.lock().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.total()
    }
}

impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    fn killed(&self) -> bool {
        self.inner.killed.load(Ordering::SeqCst)
    }

    fn exit_code(&self) -> Option<i32> {
        *self.inner.exit_code.lock()
    }

    fn kill(&self, signal: Signal) -> Result<(), ProcessError> {
        let pid = self.inner.pid.unwrap_or_default();
        self.inner.signals.lock().push(signal);

        if signal == Signal::Kill {
            self.inner.killed.store(true, Ordering::SeqCst);
            self.inner.exit(137);
            return Ok(());
        }

        match self.inner.on_terminate.clone() {
            OnTerminate::Vanish => return Err(ProcessError::NotFound { pid }),
            OnTerminate::Ignore => {}
            OnTerminate::ExitAfter(delay) => {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.exit(143);
                });
            }
            OnTerminate::ErrorAfter(delay, error) => {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.listeners.emit(&ProcessEvent::Error(error));
                });
            }
        }

        self.inner.killed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self, kind: ProcessEventKind, listener: Listener) {
        self.inner.listeners.add(kind, listener);
    }

    fn unsubscribe_all(&self, kind: Option<ProcessEventKind>) {
        self.inner.listeners.clear(kind);
    }
}

/// Terminator that records calls and delegates to SIGKILL on the handle
#[derive(Default)]
pub struct RecordingTerminator {
    calls: Mutex<Vec<(u32, tokio::time::Instant)>>,
}

impl RecordingTerminator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(u32, tokio::time::Instant)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Terminator for RecordingTerminator {
    async fn force_kill(&self, pid: u32, handle: &dyn ProcessHandle) -> Result<(), ProcessError> {
        self.calls.lock().push((pid, tokio::time::Instant::now()));
        handle.kill(Signal::Kill)
    }
}
