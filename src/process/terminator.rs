use super::{ProcessHandle, Signal};
use crate::error::ProcessError;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Last-resort termination once the grace period has run out
#[async_trait]
pub trait Terminator: Send + Sync {
    async fn force_kill(&self, pid: u32, handle: &dyn ProcessHandle) -> Result<(), ProcessError>;
}

/// Sends SIGKILL through the handle
#[derive(Debug, Default)]
pub struct SignalTerminator;

#[async_trait]
impl Terminator for SignalTerminator {
    async fn force_kill(&self, pid: u32, handle: &dyn ProcessHandle) -> Result<(), ProcessError> {
        debug!("Sending SIGKILL to process {}", pid);
        handle.kill(Signal::Kill)
    }
}

/// Runs `taskkill /pid <pid> /T /F` so the whole process tree goes down
#[derive(Debug)]
pub struct TaskkillTerminator {
    timeout: Duration,
}

impl TaskkillTerminator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

// taskkill exits with 128 when no process matches the pid
const TASKKILL_NOT_FOUND: i32 = 128;

#[async_trait]
impl Terminator for TaskkillTerminator {
    async fn force_kill(&self, pid: u32, _handle: &dyn ProcessHandle) -> Result<(), ProcessError> {
        debug!("Running taskkill for process tree {}", pid);

        let output = Command::new("taskkill")
            .args(["/pid", &pid.to_string(), "/T", "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ProcessError::ForceKill {
                    pid,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ProcessError::ForceKill {
                    pid,
                    message: format!("taskkill did not finish within {:?}", self.timeout),
                })
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.code() == Some(TASKKILL_NOT_FOUND) || stderr.contains("not found") {
            return Err(ProcessError::NotFound { pid });
        }

        Err(ProcessError::ForceKill {
            pid,
            message: stderr.trim().to_string(),
        })
    }
}

/// Pick the force-kill strategy for the current platform
pub fn platform_terminator(force_kill_timeout: Duration) -> Arc<dyn Terminator> {
    if cfg!(windows) {
        Arc::new(TaskkillTerminator::new(force_kill_timeout))
    } else {
        Arc::new(SignalTerminator)
    }
}
