use crate::config::ServiceProcessConfig;
use crate::error::ServiceError;
use crate::process::{ChildProcess, ProcessHandle, ProcessShutdownController, ProcessTable};
use crate::services::{ManagedService, ServiceSummary};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// A service backed by an OS process.
///
/// With a `command` the process is spawned, tracked in the shared process
/// table and considered up once `health_addr` accepts TCP connections.
/// Without one the service is assumed to be managed elsewhere and is only
/// waited for.
pub struct ProcessService {
    name: String,
    config: ServiceProcessConfig,
    processes: ProcessTable,
    controller: Arc<ProcessShutdownController>,
}

impl ProcessService {
    pub fn new<S: Into<String>>(
        name: S,
        config: ServiceProcessConfig,
        processes: ProcessTable,
        controller: Arc<ProcessShutdownController>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            processes,
            controller,
        }
    }

    fn command(&self, program: &str) -> Command {
        let mut command = Command::new(program);
        command.args(&self.config.args).stdin(Stdio::null());
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command
    }

    async fn spawn(&self, program: &str) -> Result<Arc<ChildProcess>, ServiceError> {
        info!("Starting {}: {} {}", self.name, program, self.config.args.join(" "));

        let child = ChildProcess::spawn(self.name.clone(), &mut self.command(program))
            .map_err(|e| ServiceError::initialization(self.name.clone(), e.to_string()))?;
        let child = Arc::new(child);

        if let Some(previous) = self.processes.insert(self.name.clone(), child.clone()) {
            warn!("Replacing a previous {} process", self.name);
            self.controller
                .shutdown_process(&self.name, Some(previous.as_ref()))
                .await;
        }

        Ok(child)
    }

    async fn wait_until_ready(
        &self,
        child: Option<&ChildProcess>,
        cancel: &CancellationToken,
    ) -> Result<(), ServiceError> {
        let Some(addr) = &self.config.health_addr else {
            debug!("{} has no health address, treating spawn as ready", self.name);
            return Ok(());
        };

        let timeout = self.config.ready_timeout();
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if probe(addr).await {
                info!("{} is accepting connections on {}", self.name, addr);
                return Ok(());
            }

            if let Some(code) = child.and_then(ProcessHandle::exit_code) {
                return Err(ServiceError::initialization(
                    self.name.clone(),
                    format!("process exited with code {} before becoming ready", code),
                ));
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(ServiceError::initialization(
                    self.name.clone(),
                    format!("{} not reachable within {:?}", addr, timeout),
                ));
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ServiceError::Cancelled {
                        service: self.name.clone(),
                    });
                }
                _ = tokio::time::sleep(READY_POLL_INTERVAL) => {}
            }
        }
    }

    async fn stop_process(&self) {
        let handle = self.processes.remove(&self.name);
        self.controller
            .shutdown_process(&self.name, handle.as_deref())
            .await;
    }
}

#[async_trait]
impl ManagedService for ProcessService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, cancel: &CancellationToken) -> Result<(), ServiceError> {
        let child = match (&self.config.command, &self.config.health_addr) {
            (Some(program), _) => Some(self.spawn(program).await?),
            (None, Some(addr)) => {
                info!("{} is managed externally, waiting for {}", self.name, addr);
                None
            }
            (None, None) => {
                return Err(ServiceError::NotConfigured {
                    service: self.name.clone(),
                })
            }
        };

        let ready = self.wait_until_ready(child.as_deref(), cancel).await;
        if ready.is_err() && child.is_some() {
            self.stop_process().await;
        }
        ready
    }

    async fn shutdown(&self) -> Result<(), ServiceError> {
        self.stop_process().await;
        Ok(())
    }

    async fn check_connection(&self) -> Option<bool> {
        match &self.config.health_addr {
            Some(addr) => Some(probe(addr).await),
            None => None,
        }
    }

    async fn status_summary(&self) -> Option<ServiceSummary> {
        self.config.backend.as_ref().map(|backend| ServiceSummary {
            active_backend: Some(backend.clone()),
        })
    }
}

async fn probe(addr: &str) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}
