use super::*;
use crate::error::ProcessError;
use crate::health::{HealthCheckState, HealthMonitor};
use crate::status::{ServiceHealth, ServiceRegistry, ServiceStatus};
use crate::testing::{FakeProcess, OnTerminate, RecordingTerminator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

fn controller_with(terminator: Arc<RecordingTerminator>) -> ProcessShutdownController {
    ProcessShutdownController::with_terminator(Duration::from_millis(5000), terminator)
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_process_skips_inert_handles() {
    let terminator = RecordingTerminator::new();
    let controller = controller_with(Arc::clone(&terminator));

    controller.shutdown_process("missing", None).await;

    let no_pid = FakeProcess::without_pid();
    controller.shutdown_process("no_pid", Some(&no_pid)).await;

    let killed = FakeProcess::already_killed(11);
    controller.shutdown_process("killed", Some(&killed)).await;

    let exited = FakeProcess::already_exited(12, 0);
    controller.shutdown_process("exited", Some(&exited)).await;

    assert!(no_pid.signals().is_empty());
    assert!(killed.signals().is_empty());
    assert!(exited.signals().is_empty());
    assert!(terminator.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_clean_exit_within_grace_period() {
    let terminator = RecordingTerminator::new();
    let controller = controller_with(Arc::clone(&terminator));
    let process = FakeProcess::new(100, OnTerminate::ExitAfter(Duration::from_millis(10)));

    let started = Instant::now();
    controller.shutdown_process("vector_db", Some(&process)).await;

    assert_eq!(started.elapsed(), Duration::from_millis(10));
    assert_eq!(process.signals(), vec![Signal::Terminate]);
    assert_eq!(process.exit_code(), Some(143));
    assert!(terminator.calls().is_empty());
    assert_eq!(process.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hung_process_is_force_killed_once_after_grace_period() {
    let terminator = RecordingTerminator::new();
    let controller = controller_with(Arc::clone(&terminator));
    let process = FakeProcess::new(200, OnTerminate::Ignore);

    let started = Instant::now();
    controller.shutdown_process("llama", Some(&process)).await;

    let calls = terminator.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, 200);
    assert_eq!(calls[0].1 - started, Duration::from_millis(5000));
    assert_eq!(process.signals(), vec![Signal::Terminate, Signal::Kill]);
    assert_eq!(process.listener_count(), 0);

    // A second attempt finds the handle killed and does nothing
    controller.shutdown_process("llama", Some(&process)).await;
    assert_eq!(terminator.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_vanished_process_returns_without_escalation() {
    let terminator = RecordingTerminator::new();
    let controller = controller_with(Arc::clone(&terminator));
    let process = FakeProcess::new(300, OnTerminate::Vanish);

    let started = Instant::now();
    controller.shutdown_process("vector_db", Some(&process)).await;

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(terminator.calls().is_empty());
    assert_eq!(process.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_error_event_resolves_shutdown() {
    let terminator = RecordingTerminator::new();
    let controller = controller_with(Arc::clone(&terminator));

    for error in [
        ProcessError::NotFound { pid: 400 },
        ProcessError::Wait {
            pid: 400,
            message: "wait failed".to_string(),
        },
    ] {
        let process = FakeProcess::new(
            400,
            OnTerminate::ErrorAfter(Duration::from_millis(50), error),
        );

        let started = Instant::now();
        controller.shutdown_process("llama", Some(&process)).await;

        assert_eq!(started.elapsed(), Duration::from_millis(50));
        assert_eq!(process.listener_count(), 0);
    }

    assert!(terminator.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_existing_listeners_are_stripped() {
    let controller = controller_with(RecordingTerminator::new());
    let process = FakeProcess::new(500, OnTerminate::ExitAfter(Duration::from_millis(5)));
    let stale_calls = Arc::new(AtomicUsize::new(0));

    for kind in ProcessEventKind::ALL {
        let stale_calls = Arc::clone(&stale_calls);
        process.subscribe(
            kind,
            Arc::new(move |_event: &ProcessEvent| {
                stale_calls.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }
    assert_eq!(process.listener_count(), 5);

    controller.shutdown_process("vector_db", Some(&process)).await;

    assert_eq!(stale_calls.load(Ordering::SeqCst), 0);
    assert_eq!(process.listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_resets_everything() {
    let terminator = RecordingTerminator::new();
    let controller = controller_with(Arc::clone(&terminator));
    let table = ProcessTable::new();
    let registry = ServiceRegistry::new(["vector_db", "llama"]);
    registry.set_state("vector_db", ServiceStatus::Running, ServiceHealth::Healthy);
    registry.set_state("llama", ServiceStatus::Failed, ServiceHealth::Unhealthy);

    let processes = vec![
        FakeProcess::new(1, OnTerminate::ExitAfter(Duration::from_millis(20))),
        FakeProcess::new(2, OnTerminate::Ignore),
        FakeProcess::new(3, OnTerminate::Vanish),
        FakeProcess::already_exited(4, 1),
    ];
    for (index, process) in processes.iter().enumerate() {
        table.insert(format!("proc-{}", index), Arc::new(process.clone()));
    }

    let monitor = HealthMonitor::new();
    monitor.start(Duration::from_secs(60), || async {});
    let check_state = HealthCheckState::new();
    assert!(check_state.try_begin());

    controller
        .shutdown(ShutdownScope {
            service_processes: &table,
            service_status: &registry,
            health_monitor: Some(&monitor),
            health_check_state: Some(&check_state),
        })
        .await;

    assert!(table.is_empty());
    assert!(!monitor.is_running());
    assert!(!check_state.is_in_progress());
    assert_eq!(terminator.calls().len(), 1);
    for entry in registry.snapshot().values() {
        assert_eq!(entry.status, ServiceStatus::Stopped);
        assert_eq!(entry.health, ServiceHealth::Unknown);
    }
}

#[tokio::test(start_paused = true)]
async fn test_processes_stop_concurrently() {
    let controller = controller_with(RecordingTerminator::new());
    let table = ProcessTable::new();
    let registry = ServiceRegistry::new(["vector_db", "llama"]);

    let quick = FakeProcess::new(10, OnTerminate::ExitAfter(Duration::from_millis(10)));
    let hung = FakeProcess::new(20, OnTerminate::Ignore);
    table.insert("quick", Arc::new(quick.clone()));
    table.insert("hung", Arc::new(hung.clone()));

    let started = Instant::now();
    controller
        .shutdown(ShutdownScope {
            service_processes: &table,
            service_status: &registry,
            health_monitor: None,
            health_check_state: None,
        })
        .await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(5000));
    assert!(elapsed < Duration::from_millis(5010));
    assert_eq!(quick.exit_code(), Some(143));
    assert_eq!(hung.signals(), vec![Signal::Terminate, Signal::Kill]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_table_shutdown() {
    let controller = controller_with(RecordingTerminator::new());
    let table = ProcessTable::new();
    let registry = ServiceRegistry::new(["vector_db"]);

    controller
        .shutdown(ShutdownScope {
            service_processes: &table,
            service_status: &registry,
            health_monitor: None,
            health_check_state: None,
        })
        .await;

    assert_eq!(
        registry.get("vector_db").unwrap().status,
        ServiceStatus::Stopped
    );
}

#[tokio::test]
async fn test_signal_terminator_sends_kill() {
    let process = FakeProcess::new(600, OnTerminate::Ignore);

    SignalTerminator.force_kill(600, &process).await.unwrap();

    assert_eq!(process.signals(), vec![Signal::Kill]);
    assert_eq!(process.exit_code(), Some(137));
}

#[test]
fn test_listener_set_emits_by_kind() {
    let listeners = ListenerSet::new();
    let exits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&exits);
    listeners.add(
        ProcessEventKind::Exit,
        Arc::new(move |_event: &ProcessEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    listeners.emit(&ProcessEvent::Message("ready".to_string()));
    listeners.emit(&ProcessEvent::Exit { code: Some(0) });
    assert_eq!(exits.load(Ordering::SeqCst), 1);

    listeners.clear(Some(ProcessEventKind::Exit));
    listeners.emit(&ProcessEvent::Exit { code: Some(0) });
    assert_eq!(exits.load(Ordering::SeqCst), 1);
    assert_eq!(listeners.total(), 0);
}

#[cfg(unix)]
mod child_process {
    use super::*;
    use tokio::process::Command;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_child_exit_is_recorded_and_broadcast() {
        let mut command = Command::new("sh");
        command.args(["-c", "exit 3"]);
        let child = ChildProcess::spawn("short_lived", &mut command).unwrap();

        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(parking_lot::Mutex::new(Some(tx)));
        child.subscribe(
            ProcessEventKind::Close,
            Arc::new(move |event: &ProcessEvent| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(event.clone());
                }
            }),
        );

        let event = match child.exit_code() {
            Some(code) => ProcessEvent::Close { code: Some(code) },
            None => tokio::time::timeout(Duration::from_secs(5), rx)
                .await
                .unwrap()
                .unwrap(),
        };

        assert_eq!(event, ProcessEvent::Close { code: Some(3) });
        assert_eq!(child.exit_code(), Some(3));
        assert!(child
            .kill(Signal::Terminate)
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_controller_terminates_real_child() {
        let mut command = Command::new("sleep");
        command.arg("30");
        let child = ChildProcess::spawn("sleeper", &mut command).unwrap();
        let controller =
            ProcessShutdownController::with_terminator(Duration::from_secs(5), Arc::new(SignalTerminator));

        let started = std::time::Instant::now();
        controller.shutdown_process("sleeper", Some(&child)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(child.killed());
        assert_eq!(child.exit_code(), Some(128 + libc::SIGTERM));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let mut command = Command::new("/nonexistent/lifeline-test-binary");
        let err = ChildProcess::spawn("ghost", &mut command).err().unwrap();

        assert!(matches!(err, ProcessError::Spawn { ref name, .. } if name == "ghost"));
    }
}
