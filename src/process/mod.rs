mod child;
mod controller;
mod terminator;

#[cfg(test)]
mod tests;

pub use child::ChildProcess;
pub use controller::{ProcessShutdownController, ShutdownScope};
pub use terminator::{platform_terminator, SignalTerminator, TaskkillTerminator, Terminator};

use crate::error::ProcessError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Signals the shutdown controller sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Polite request to exit (SIGTERM)
    Terminate,
    /// Forced kill (SIGKILL)
    Kill,
}

/// Event kinds a process handle can notify about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessEventKind {
    Exit,
    Error,
    Close,
    Disconnect,
    Message,
}

impl ProcessEventKind {
    pub const ALL: [ProcessEventKind; 5] = [
        ProcessEventKind::Exit,
        ProcessEventKind::Error,
        ProcessEventKind::Close,
        ProcessEventKind::Disconnect,
        ProcessEventKind::Message,
    ];
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    Exit { code: Option<i32> },
    Error(ProcessError),
    Close { code: Option<i32> },
    Disconnect,
    Message(String),
}

impl ProcessEvent {
    pub fn kind(&self) -> ProcessEventKind {
        match self {
            ProcessEvent::Exit { .. } => ProcessEventKind::Exit,
            ProcessEvent::Error(_) => ProcessEventKind::Error,
            ProcessEvent::Close { .. } => ProcessEventKind::Close,
            ProcessEvent::Disconnect => ProcessEventKind::Disconnect,
            ProcessEvent::Message(_) => ProcessEventKind::Message,
        }
    }
}

pub type Listener = Arc<dyn Fn(&ProcessEvent) + Send + Sync>;

/// An OS process the caller owns and the shutdown controller may signal
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// True once a signal has been delivered successfully
    fn killed(&self) -> bool;

    /// Set once the process has exited
    fn exit_code(&self) -> Option<i32>;

    fn kill(&self, signal: Signal) -> Result<(), ProcessError>;

    fn subscribe(&self, kind: ProcessEventKind, listener: Listener);

    /// Drop listeners for `kind`, or for every kind when `None`
    fn unsubscribe_all(&self, kind: Option<ProcessEventKind>);
}

/// Listener bookkeeping shared by process handle implementations
#[derive(Default)]
pub struct ListenerSet {
    listeners: Mutex<HashMap<ProcessEventKind, Vec<Listener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, kind: ProcessEventKind, listener: Listener) {
        self.listeners.lock().entry(kind).or_default().push(listener);
    }

    pub fn clear(&self, kind: Option<ProcessEventKind>) {
        let mut listeners = self.listeners.lock();
        match kind {
            Some(kind) => {
                listeners.remove(&kind);
            }
            None => listeners.clear(),
        }
    }

    pub fn total(&self) -> usize {
        self.listeners.lock().values().map(Vec::len).sum()
    }

    /// Invoke every listener registered for the event's kind
    pub fn emit(&self, event: &ProcessEvent) {
        // Listeners may unsubscribe while running, so call them unlocked
        let listeners = self
            .listeners
            .lock()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        for listener in listeners {
            listener(event);
        }
    }
}

/// Processes tracked by name for teardown
#[derive(Clone, Default)]
pub struct ProcessTable {
    processes: Arc<Mutex<HashMap<String, Arc<dyn ProcessHandle>>>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `handle` under `name`, returning any handle it replaces
    pub fn insert<S: Into<String>>(
        &self,
        name: S,
        handle: Arc<dyn ProcessHandle>,
    ) -> Option<Arc<dyn ProcessHandle>> {
        self.processes.lock().insert(name.into(), handle)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProcessHandle>> {
        self.processes.lock().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn ProcessHandle>> {
        self.processes.lock().remove(name)
    }

    pub fn entries(&self) -> Vec<(String, Arc<dyn ProcessHandle>)> {
        self.processes
            .lock()
            .iter()
            .map(|(name, handle)| (name.clone(), Arc::clone(handle)))
            .collect()
    }

    pub fn clear(&self) {
        self.processes.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.processes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.lock().is_empty()
    }
}
