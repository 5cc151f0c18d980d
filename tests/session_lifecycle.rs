//! End-to-end session lifecycle tests
//!
//! Exercises the core the way the WebSocket layer drives it: open a channel,
//! run a real shell through the bridge, poll processes on a schedule, and
//! verify that teardown releases every owned resource exactly once.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use vantage_core::{
    jobs, procs, pty, AgentEvent, Principal, ProcessEntry, SessionRegistry, TokenVerifier,
};

fn admin() -> Principal {
    Principal {
        role: "admin".to_string(),
    }
}

fn sh_config() -> pty::TerminalConfig {
    pty::TerminalConfig {
        shell: "/bin/sh".to_string(),
        cwd: None,
    }
}

/// Open a channel and keep both ends: the sink the bridge writes to and the
/// receiver the transport would drain.
async fn open_channel(
    registry: &SessionRegistry,
) -> (
    Uuid,
    mpsc::UnboundedSender<AgentEvent>,
    mpsc::UnboundedReceiver<AgentEvent>,
) {
    let id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    registry.on_open(id, admin(), tx.clone()).await;
    (id, tx, rx)
}

async fn next_snapshot(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<ProcessEntry> {
    loop {
        match rx.recv().await {
            Some(AgentEvent::Processes { list }) => return list,
            Some(_) => continue,
            None => panic!("channel sink closed early"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminal_session_round_trip_and_teardown() {
    let registry = SessionRegistry::new();
    let (id, sink, mut rx) = open_channel(&registry).await;

    // Start the terminal with explicit dimensions.
    let (handle, exit_rx) = pty::spawn_shell(&sh_config(), Some(100), Some(30), sink).unwrap();
    registry.attach_terminal(id, handle.clone()).await.unwrap();
    assert!(registry.has_terminal(id).await);
    assert_eq!(handle.size(), (100, 30));

    // Input flows to the shell, output flows back in order.
    handle.input(b"echo hi_$((1+1))\n".to_vec());
    let mut seen = String::new();
    timeout(Duration::from_secs(10), async {
        while let Some(event) = rx.recv().await {
            if let AgentEvent::TerminalOutput { data } = event {
                seen.push_str(&data);
                if seen.contains("hi_2") {
                    break;
                }
            }
        }
    })
    .await
    .expect("terminal output did not arrive");

    // Close tears the subprocess down without waiting for a graceful exit.
    registry.on_close(id).await;
    timeout(Duration::from_secs(10), exit_rx)
        .await
        .expect("subprocess not reaped after close")
        .unwrap();
    assert!(!handle.is_running());
    assert!(registry.is_empty().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn double_start_yields_exactly_one_subprocess() {
    let registry = SessionRegistry::new();
    let (id, sink, _rx) = open_channel(&registry).await;

    let (first, _first_exit) = pty::spawn_shell(&sh_config(), None, None, sink.clone()).unwrap();
    registry.attach_terminal(id, first.clone()).await.unwrap();

    // A second start request finds the slot occupied and must not replace
    // the live handle. (The WS layer checks `has_terminal` first and never
    // even spawns; attach is the backstop.)
    assert!(registry.has_terminal(id).await);
    let (second, _second_exit) = pty::spawn_shell(&sh_config(), None, None, sink).unwrap();
    assert!(registry.attach_terminal(id, second.clone()).await.is_err());
    second.terminate();

    assert!(first.is_running());
    registry.on_close(id).await;
    assert!(!first.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_after_exit_is_possible() {
    let registry = SessionRegistry::new();
    let (id, sink, mut rx) = open_channel(&registry).await;

    let (handle, exit_rx) = pty::spawn_shell(&sh_config(), None, None, sink.clone()).unwrap();
    registry.attach_terminal(id, handle).await.unwrap();

    // Shell exits on its own; the slot clears and an exit event is emitted.
    registry.terminal(id).await.unwrap().input(b"exit\n".to_vec());
    timeout(Duration::from_secs(10), exit_rx)
        .await
        .expect("exit not observed")
        .unwrap();
    registry.clear_terminal(id).await;

    let mut saw_exit = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, AgentEvent::TerminalExit) {
            saw_exit = true;
        }
    }
    assert!(saw_exit, "natural exit must notify the channel");
    assert!(!registry.has_terminal(id).await);

    // A new start succeeds now that the slot is clear.
    let (again, _exit) = pty::spawn_shell(&sh_config(), None, None, sink).unwrap();
    registry.attach_terminal(id, again).await.unwrap();
    registry.on_close(id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn process_watch_fires_immediately_then_on_interval() {
    let registry = SessionRegistry::new();
    let (id, _sink, mut rx) = open_channel(&registry).await;

    let interval = Duration::from_secs(2);
    let job_registry = registry.clone();
    let started = Instant::now();
    let job = jobs::schedule("process-watch", interval, move || {
        let registry = job_registry.clone();
        async move {
            let list = procs::top_processes().await?;
            registry.send(id, AgentEvent::Processes { list }).await;
            Ok(())
        }
    });
    registry.attach_job(id, job).await.unwrap();

    // First snapshot arrives promptly (bounded by one CPU sampling pass).
    let first = timeout(Duration::from_secs(5), next_snapshot(&mut rx))
        .await
        .expect("first snapshot missing");
    assert!(first.len() <= 15);
    let first_at = started.elapsed();

    // Second snapshot waits out the interval, not sooner.
    timeout(Duration::from_secs(10), next_snapshot(&mut rx))
        .await
        .expect("second snapshot missing");
    let second_at = started.elapsed();
    assert!(
        second_at - first_at >= interval - Duration::from_millis(100),
        "snapshot re-armed too early: {:?}",
        second_at - first_at
    );

    // Unwatch: at most one in-flight snapshot may still land, then silence.
    registry.cancel_job(id, "process-watch").await;
    tokio::time::sleep(interval + Duration::from_millis(500)).await;
    let mut extra = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, AgentEvent::Processes { .. }) {
            extra += 1;
        }
    }
    assert!(extra <= 1, "snapshots kept arriving after unwatch");

    registry.on_close(id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_credential_allocates_nothing() {
    // The gate runs before registration: a bad token never reaches on_open.
    let verifier = TokenVerifier::new("secret");
    let registry = SessionRegistry::new();

    let result = verifier.verify("bogus.token.here");
    assert!(result.is_err());
    assert!(registry.is_empty().await);
}
