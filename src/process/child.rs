use super::{Listener, ListenerSet, ProcessEvent, ProcessEventKind, ProcessHandle, Signal};
use crate::error::ProcessError;
use parking_lot::Mutex;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::{Child, Command};
#[cfg(not(unix))]
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct ChildState {
    killed: AtomicBool,
    exit_code: Mutex<Option<i32>>,
    listeners: ListenerSet,
}

/// `ProcessHandle` over a spawned tokio child.
///
/// A watcher task owns the child, reaps it, records the exit code and fans
/// the exit out to subscribers as `Exit` followed by `Close`.
pub struct ChildProcess {
    pid: Option<u32>,
    state: Arc<ChildState>,
    #[cfg(not(unix))]
    control: mpsc::UnboundedSender<Signal>,
}

impl ChildProcess {
    pub fn spawn<S: Into<String>>(name: S, command: &mut Command) -> Result<Self, ProcessError> {
        let name = name.into();
        let child = command.spawn().map_err(|e| ProcessError::Spawn {
            name: name.clone(),
            message: e.to_string(),
        })?;
        let pid = child.id();

        let state = Arc::new(ChildState {
            killed: AtomicBool::new(false),
            exit_code: Mutex::new(None),
            listeners: ListenerSet::new(),
        });

        debug!("Spawned '{}' with pid {:?}", name, pid);

        #[cfg(unix)]
        {
            tokio::spawn(watch_child(name, pid, child, Arc::clone(&state)));
            Ok(Self { pid, state })
        }

        #[cfg(not(unix))]
        {
            let (control, control_rx) = mpsc::unbounded_channel();
            tokio::spawn(watch_child(
                name,
                pid,
                child,
                Arc::clone(&state),
                control_rx,
            ));
            Ok(Self {
                pid,
                state,
                control,
            })
        }
    }

    #[cfg(unix)]
    fn send_signal(&self, pid: u32, signal: Signal) -> Result<(), ProcessError> {
        let signo = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };

        let rc = unsafe { libc::kill(pid as libc::pid_t, signo) };
        if rc == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Err(ProcessError::NotFound { pid })
        } else {
            Err(ProcessError::Signal {
                pid,
                message: err.to_string(),
            })
        }
    }

    #[cfg(not(unix))]
    fn send_signal(&self, pid: u32, signal: Signal) -> Result<(), ProcessError> {
        // The watcher is gone once the child has been reaped
        self.control
            .send(signal)
            .map_err(|_| ProcessError::NotFound { pid })
    }
}

impl ProcessHandle for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn killed(&self) -> bool {
        self.state.killed.load(Ordering::Acquire)
    }

    fn exit_code(&self) -> Option<i32> {
        *self.state.exit_code.lock()
    }

    fn kill(&self, signal: Signal) -> Result<(), ProcessError> {
        let pid = self.pid.ok_or(ProcessError::NotFound { pid: 0 })?;

        // Once reaped the pid may belong to someone else
        if self.exit_code().is_some() {
            return Err(ProcessError::NotFound { pid });
        }

        self.send_signal(pid, signal)?;
        self.state.killed.store(true, Ordering::Release);
        Ok(())
    }

    fn subscribe(&self, kind: ProcessEventKind, listener: Listener) {
        self.state.listeners.add(kind, listener);
    }

    fn unsubscribe_all(&self, kind: Option<ProcessEventKind>) {
        self.state.listeners.clear(kind);
    }
}

#[cfg(unix)]
async fn watch_child(name: String, pid: Option<u32>, mut child: Child, state: Arc<ChildState>) {
    let result = child.wait().await;
    record_exit(&name, pid, result, &state);
}

#[cfg(not(unix))]
async fn watch_child(
    name: String,
    pid: Option<u32>,
    mut child: Child,
    state: Arc<ChildState>,
    mut control: mpsc::UnboundedReceiver<Signal>,
) {
    let result = loop {
        tokio::select! {
            result = child.wait() => break result,
            Some(signal) = control.recv() => {
                debug!("Delivering {:?} to '{}'", signal, name);
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill '{}': {}", name, e);
                }
            }
        }
    };
    record_exit(&name, pid, result, &state);
}

fn record_exit(
    name: &str,
    pid: Option<u32>,
    result: std::io::Result<ExitStatus>,
    state: &ChildState,
) {
    match result {
        Ok(status) => {
            let code = exit_code_of(&status);
            *state.exit_code.lock() = Some(code);
            debug!("Process '{}' exited with {}", name, status);

            state.listeners.emit(&ProcessEvent::Exit { code: Some(code) });
            state.listeners.emit(&ProcessEvent::Close { code: Some(code) });
        }
        Err(e) => {
            warn!("Failed waiting on '{}': {}", name, e);
            state.listeners.emit(&ProcessEvent::Error(ProcessError::Wait {
                pid: pid.unwrap_or_default(),
                message: e.to_string(),
            }));
        }
    }
}

/// Exit code, or 128 + signal number for signal deaths on unix
fn exit_code_of(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
