//! Command dispatcher
//!
//! Stateless execution of OS-level commands on behalf of a channel. One-shot
//! commands buffer their output; long-running scripts stream chunks as they
//! arrive. A failing managed command never affects the agent's own liveness:
//! spawn errors become [`Error::Command`], non-zero exits are reported in the
//! returned [`CommandOutput`] for the caller to translate into a
//! channel-visible notification.

use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Captured result of a one-shot command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Exit code (-1 if terminated by a signal)
    pub code: i32,
}

impl CommandOutput {
    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// One chunk of a streamed script execution.
#[derive(Debug, Clone)]
pub enum ScriptChunk {
    /// A chunk of standard output
    Stdout(String),
    /// A chunk of standard error
    Stderr(String),
    /// The script finished with this exit code; always the final chunk
    Finished(i32),
}

/// Run a one-shot command to completion, capturing its output.
///
/// Arguments are passed as discrete argv entries, never through a shell.
/// A non-zero exit is not an `Err`: callers inspect
/// [`CommandOutput::success`] and report accordingly.
pub async fn run(program: &str, args: &[&str]) -> Result<CommandOutput> {
    debug!(program, ?args, "dispatching command");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::Command(format!("{program}: {e}")))?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code: output.status.code().unwrap_or(-1),
    })
}

/// Spawn a long-running script via `sh -c`, streaming its output.
///
/// Chunks arrive on the returned receiver in production order per stream;
/// the final chunk is always [`ScriptChunk::Finished`]. Ordering between
/// stdout and stderr is not guaranteed (they are independent pipes).
pub fn stream(command: &str) -> Result<mpsc::UnboundedReceiver<ScriptChunk>> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Command(format!("{command}: {e}")))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    tokio::spawn(async move {
        let out_task = stdout.map(|s| tokio::spawn(forward(s, tx.clone(), false)));
        let err_task = stderr.map(|s| tokio::spawn(forward(s, tx.clone(), true)));

        // Drain both pipes to EOF before reaping, so Finished is last.
        if let Some(task) = out_task {
            let _ = task.await;
        }
        if let Some(task) = err_task {
            let _ = task.await;
        }

        let code = match child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                warn!(error = %e, "failed to reap script child");
                -1
            }
        };
        let _ = tx.send(ScriptChunk::Finished(code));
    });

    Ok(rx)
}

async fn forward<R>(mut reader: R, tx: mpsc::UnboundedSender<ScriptChunk>, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let data = String::from_utf8_lossy(&buf[..n]).into_owned();
                let chunk = if is_stderr {
                    ScriptChunk::Stderr(data)
                } else {
                    ScriptChunk::Stdout(data)
                };
                if tx.send(chunk).is_err() {
                    break;
                }
            }
        }
    }
}
