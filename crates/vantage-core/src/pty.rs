//! Pseudo-terminal bridge
//!
//! Owns one interactive subprocess per channel. Channel input and resize
//! requests are translated to the PTY; subprocess output and exit are
//! translated to channel events on the owning session's sink.
//!
//! Lifecycle per session record: Unstarted (no handle) → Running (handle
//! attached) → Exited (handle cleared). Exactly one of {subprocess exit,
//! explicit teardown} destroys the subprocess: both race on a shared
//! `done` flag, the first wins, and the loser observes an already-cleared
//! state instead of double-freeing the child.

use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::events::AgentEvent;

/// Default terminal width when the client does not specify one.
pub const DEFAULT_COLS: u16 = 80;
/// Default terminal height when the client does not specify one.
pub const DEFAULT_ROWS: u16 = 24;

/// How the interactive subprocess is launched.
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    /// Shell binary to spawn
    pub shell: String,
    /// Working directory for the subprocess (agent's cwd if `None`)
    pub cwd: Option<PathBuf>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: std::env::var("SHELL").unwrap_or_else(|_| "bash".to_string()),
            cwd: std::env::var_os("HOME").map(PathBuf::from),
        }
    }
}

/// Handle to one live interactive subprocess.
///
/// Cheap to clone; all clones refer to the same subprocess. The session
/// registry owns the canonical clone and drops it on teardown or exit.
#[derive(Clone)]
pub struct TerminalHandle {
    pid: Option<u32>,
    size: Arc<StdMutex<(u16, u16)>>,
    input_tx: mpsc::UnboundedSender<Vec<u8>>,
    master: Arc<StdMutex<Box<dyn MasterPty + Send>>>,
    killer: Arc<StdMutex<Box<dyn ChildKiller + Send + Sync>>>,
    done: Arc<AtomicBool>,
}

impl std::fmt::Debug for TerminalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalHandle")
            .field("pid", &self.pid)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl TerminalHandle {
    /// OS process id of the subprocess, if known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current terminal dimensions as (cols, rows).
    pub fn size(&self) -> (u16, u16) {
        *self.size.lock().expect("size lock poisoned")
    }

    /// Whether the subprocess is still considered live.
    pub fn is_running(&self) -> bool {
        !self.done.load(Ordering::Acquire)
    }

    /// Write bytes to the subprocess's stdin. Ignored after exit/teardown.
    pub fn input(&self, bytes: Vec<u8>) {
        if !self.is_running() {
            return;
        }
        let _ = self.input_tx.send(bytes);
    }

    /// Resize the terminal. Ignored after exit/teardown.
    pub fn resize(&self, cols: u16, rows: u16) {
        if !self.is_running() || cols == 0 || rows == 0 {
            return;
        }
        let master = self.master.lock().expect("master lock poisoned");
        if let Err(e) = master.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }) {
            warn!(error = %e, "terminal resize failed");
            return;
        }
        *self.size.lock().expect("size lock poisoned") = (cols, rows);
    }

    /// Forcibly terminate the subprocess without waiting for graceful exit.
    ///
    /// Once-guarded: if the subprocess already exited (or teardown already
    /// ran) this is a no-op, so a recycled PID can never be signalled. The
    /// exit-event emission is disarmed by the same guard.
    pub fn terminate(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut killer = self.killer.lock().expect("killer lock poisoned");
        if let Err(e) = killer.kill() {
            debug!(error = %e, "terminal kill signal not delivered");
        }
    }
}

/// Spawn an interactive shell bridged to the given channel sink.
///
/// Falls back to [`DEFAULT_COLS`]×[`DEFAULT_ROWS`] when dimensions are
/// missing or zero. The subprocess inherits the agent's environment with
/// `TERM` set for full-color terminals.
///
/// Returns the handle plus a receiver that resolves when the subprocess has
/// exited and been reaped; the owner uses it to clear the session record's
/// terminal slot so a later start works again. The `TerminalExit` event is
/// emitted on the sink only if the exit won the race against teardown.
pub fn spawn_shell(
    config: &TerminalConfig,
    cols: Option<u16>,
    rows: Option<u16>,
    sink: mpsc::UnboundedSender<AgentEvent>,
) -> Result<(TerminalHandle, oneshot::Receiver<()>)> {
    let cols = cols.filter(|c| *c > 0).unwrap_or(DEFAULT_COLS);
    let rows = rows.filter(|r| *r > 0).unwrap_or(DEFAULT_ROWS);

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| Error::Spawn(e.to_string()))?;

    let mut cmd = CommandBuilder::new(&config.shell);
    cmd.env("TERM", "xterm-256color");
    if let Some(dir) = &config.cwd {
        cmd.cwd(dir);
    }

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| Error::Spawn(e.to_string()))?;
    drop(pair.slave);

    let pid = child.process_id();
    let killer = child.clone_killer();
    let done = Arc::new(AtomicBool::new(false));
    debug!(?pid, shell = %config.shell, cols, rows, "terminal subprocess spawned");

    // Reader: blocking thread forwarding PTY output to the channel sink.
    // Chunk boundaries are not semantically significant; ordering is.
    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| Error::Spawn(e.to_string()))?;
    let out_sink = sink.clone();
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let data = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if out_sink.send(AgentEvent::TerminalOutput { data }).is_err() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });

    // Writer: drain the input channel onto the PTY from the blocking pool.
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| Error::Spawn(e.to_string()))?;
    let writer = Arc::new(StdMutex::new(writer));
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn({
        let writer = writer.clone();
        async move {
            while let Some(bytes) = input_rx.recv().await {
                let writer = writer.clone();
                let _ = tokio::task::spawn_blocking(move || {
                    if let Ok(mut guard) = writer.lock() {
                        let _ = guard.write_all(&bytes);
                        let _ = guard.flush();
                    }
                })
                .await;
            }
        }
    });

    // Exit monitor: reap the child, emit the exit event if we won the race
    // against explicit teardown, then resolve the owner's exit receiver.
    let (exit_tx, exit_rx) = oneshot::channel();
    let exit_done = done.clone();
    tokio::spawn(async move {
        match tokio::task::spawn_blocking(move || child.wait()).await {
            Ok(Ok(status)) => debug!(code = status.exit_code(), "terminal subprocess exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for terminal subprocess"),
            Err(e) => warn!(error = %e, "terminal exit monitor task failed"),
        }
        if !exit_done.swap(true, Ordering::AcqRel) {
            let _ = sink.send(AgentEvent::TerminalExit);
        }
        let _ = exit_tx.send(());
    });

    Ok((
        TerminalHandle {
            pid,
            size: Arc::new(StdMutex::new((cols, rows))),
            input_tx,
            master: Arc::new(StdMutex::new(pair.master)),
            killer: Arc::new(StdMutex::new(killer)),
            done,
        },
        exit_rx,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn sh_config() -> TerminalConfig {
        TerminalConfig {
            shell: "/bin/sh".to_string(),
            cwd: None,
        }
    }

    async fn collect_output_until(
        rx: &mut mpsc::UnboundedReceiver<AgentEvent>,
        needle: &str,
    ) -> String {
        let mut seen = String::new();
        let deadline = Duration::from_secs(10);
        timeout(deadline, async {
            while let Some(event) = rx.recv().await {
                if let AgentEvent::TerminalOutput { data } = event {
                    seen.push_str(&data);
                    if seen.contains(needle) {
                        break;
                    }
                }
            }
        })
        .await
        .expect("terminal output did not arrive in time");
        seen
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_echo_round_trip() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (handle, exit_rx) = spawn_shell(&sh_config(), Some(100), Some(30), tx).unwrap();
        assert!(handle.is_running());
        assert_eq!(handle.size(), (100, 30));

        handle.input(b"echo vantage_$((40+2))\n".to_vec());
        let seen = collect_output_until(&mut rx, "vantage_42").await;
        assert!(seen.contains("vantage_42"));

        handle.input(b"exit\n".to_vec());
        timeout(Duration::from_secs(10), exit_rx)
            .await
            .expect("exit not observed")
            .unwrap();
        assert!(!handle.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_natural_exit_emits_exit_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (handle, exit_rx) = spawn_shell(&sh_config(), None, None, tx).unwrap();

        handle.input(b"exit 0\n".to_vec());
        timeout(Duration::from_secs(10), exit_rx)
            .await
            .expect("exit not observed")
            .unwrap();

        let mut saw_exit = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, AgentEvent::TerminalExit) {
                saw_exit = true;
            }
        }
        assert!(saw_exit);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_terminate_suppresses_exit_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (handle, exit_rx) = spawn_shell(&sh_config(), None, None, tx).unwrap();

        handle.terminate();
        assert!(!handle.is_running());
        timeout(Duration::from_secs(10), exit_rx)
            .await
            .expect("exit not observed")
            .unwrap();

        while let Ok(event) = rx.try_recv() {
            assert!(
                !matches!(event, AgentEvent::TerminalExit),
                "teardown must disarm the exit event"
            );
        }

        // A second terminate observes the cleared state and does nothing.
        handle.terminate();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawn_failure_is_reported() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = TerminalConfig {
            shell: "/definitely/not/a/shell".to_string(),
            cwd: None,
        };
        let result = spawn_shell(&config, None, None, tx);
        assert!(matches!(result, Err(Error::Spawn(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_input_after_exit_is_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (handle, exit_rx) = spawn_shell(&sh_config(), None, None, tx).unwrap();
        handle.terminate();
        let _ = timeout(Duration::from_secs(10), exit_rx).await;

        handle.input(b"echo never\n".to_vec());
        handle.resize(10, 10);
        assert_eq!(handle.size(), (DEFAULT_COLS, DEFAULT_ROWS));
    }
}
