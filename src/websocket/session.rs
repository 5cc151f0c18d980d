//! Per-connection session loop
//!
//! One task per channel: multiplexes inbound client messages with outbound
//! agent events, drives the channel's terminal and jobs through the session
//! registry, and guarantees `on_close` runs exactly once when the loop ends,
//! whether by ordinary close frame, abrupt disconnect, or transport error.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use vantage_core::{
    dispatch, jobs, procs, pty, sysops, AgentEvent, Principal, ScriptChunk, SessionRegistry,
};

use super::protocol::ClientMessage;

/// Default seconds between process snapshots.
const DEFAULT_WATCH_SECS: u64 = 10;
/// Name of the per-channel process snapshot job.
const PROCESS_WATCH_JOB: &str = "process-watch";

/// Drive one authenticated channel until it disconnects.
pub async fn handle_socket(socket: WebSocket, principal: Principal, registry: SessionRegistry) {
    let channel_id = Uuid::new_v4();
    info!(channel = %channel_id, role = %principal.role, "websocket channel established");

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut events_rx) = mpsc::unbounded_channel::<AgentEvent>();
    registry.on_open(channel_id, principal, tx.clone()).await;

    let _ = tx.send(AgentEvent::Connected { channel_id });

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                handle_client_message(client_msg, channel_id, &registry, &tx).await;
                            }
                            Err(e) => {
                                debug!(channel = %channel_id, error = %e, "unparseable client message");
                                let _ = tx.send(AgentEvent::error(format!(
                                    "Invalid message format: {e}"
                                )));
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(channel = %channel_id, "websocket closed by client");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        error!(channel = %channel_id, error = %e, "websocket error");
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
            event = events_rx.recv() => {
                match event {
                    Some(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if sender.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
        }
    }

    registry.on_close(channel_id).await;
    info!(channel = %channel_id, "websocket channel ended");
}

async fn handle_client_message(
    msg: ClientMessage,
    channel_id: Uuid,
    registry: &SessionRegistry,
    tx: &mpsc::UnboundedSender<AgentEvent>,
) {
    match msg {
        ClientMessage::TerminalStart { cols, rows } => {
            handle_terminal_start(channel_id, cols, rows, registry, tx).await;
        }
        ClientMessage::TerminalInput { data } => {
            if let Some(terminal) = registry.terminal(channel_id).await {
                terminal.input(data.into_bytes());
            }
        }
        ClientMessage::TerminalResize { cols, rows } => {
            if let Some(terminal) = registry.terminal(channel_id).await {
                terminal.resize(cols, rows);
            }
        }
        ClientMessage::ProcessesWatch { interval_secs } => {
            handle_processes_watch(channel_id, interval_secs, registry).await;
        }
        ClientMessage::ProcessesUnwatch => {
            registry.cancel_job(channel_id, PROCESS_WATCH_JOB).await;
        }
        ClientMessage::ProcessKill { pid } => {
            let event = match dispatch::run("kill", &["-9", &pid.to_string()]).await {
                Ok(out) if out.success() => AgentEvent::success(format!("Process {pid} killed")),
                _ => AgentEvent::error(format!("Failed to kill process {pid}")),
            };
            let _ = tx.send(event);
        }
        ClientMessage::ServicesList => {
            match sysops::list_services().await {
                Ok(list) => {
                    let _ = tx.send(AgentEvent::Services { list });
                }
                Err(e) => {
                    debug!(channel = %channel_id, error = %e, "service listing failed");
                    let _ = tx.send(AgentEvent::error("Failed to fetch services"));
                }
            }
        }
        ClientMessage::ServiceControl { service, action } => {
            match sysops::control_service(&action, &service).await {
                Ok(()) => {
                    let _ = tx.send(AgentEvent::success(format!("Service {service} {action}ed")));
                    let _ = tx.send(AgentEvent::ServicesRefresh);
                }
                Err(e) => {
                    debug!(channel = %channel_id, error = %e, "service control failed");
                    let _ = tx.send(AgentEvent::error(format!("Failed to {action} {service}")));
                }
            }
        }
        ClientMessage::NetworkScan => {
            match sysops::scan_wifi().await {
                Ok(list) => {
                    let _ = tx.send(AgentEvent::NetworkScanResults { list });
                }
                Err(e) => {
                    debug!(channel = %channel_id, error = %e, "wifi scan failed");
                    let _ = tx.send(AgentEvent::error("WiFi scan failed"));
                }
            }
        }
        ClientMessage::NetworkSaved => {
            match sysops::saved_connections().await {
                Ok(list) => {
                    let _ = tx.send(AgentEvent::NetworkSavedResults { list });
                }
                Err(e) => {
                    debug!(channel = %channel_id, error = %e, "saved network listing failed");
                    let _ = tx.send(AgentEvent::error("Failed to get saved networks"));
                }
            }
        }
        ClientMessage::NetworkConnect { ssid, password } => {
            let event = match sysops::connect_wifi(&ssid, password.as_deref()).await {
                Ok(()) => AgentEvent::success(format!("Connected to {ssid}")),
                Err(e) => {
                    debug!(channel = %channel_id, error = %e, "wifi connect failed");
                    AgentEvent::error(format!("Failed to connect to {ssid}"))
                }
            };
            let _ = tx.send(event);
            let _ = tx.send(AgentEvent::NetworkRefresh);
        }
        ClientMessage::NetworkForget { name } => {
            let event = match sysops::forget_network(&name).await {
                Ok(()) => AgentEvent::success(format!("Deleted {name}")),
                Err(e) => {
                    debug!(channel = %channel_id, error = %e, "network delete failed");
                    AgentEvent::error(format!("Failed to delete {name}"))
                }
            };
            let _ = tx.send(event);
            let _ = tx.send(AgentEvent::NetworkRefresh);
        }
        ClientMessage::SystemPower { action } => {
            if let Err(e) = sysops::power(action).await {
                debug!(channel = %channel_id, error = %e, "power action failed");
                let _ = tx.send(AgentEvent::error(format!("Power action failed: {e}")));
            }
        }
        ClientMessage::ScriptRun { path } => {
            handle_script_run(path, tx);
        }
        ClientMessage::Ping => {
            let _ = tx.send(AgentEvent::Pong);
        }
    }
}

/// Start the channel's terminal if it has none. A start on an
/// already-running terminal is a silent no-op, not an error.
async fn handle_terminal_start(
    channel_id: Uuid,
    cols: Option<u16>,
    rows: Option<u16>,
    registry: &SessionRegistry,
    tx: &mpsc::UnboundedSender<AgentEvent>,
) {
    if registry.has_terminal(channel_id).await {
        return;
    }
    match pty::spawn_shell(&pty::TerminalConfig::default(), cols, rows, tx.clone()) {
        Ok((handle, exit_rx)) => {
            if registry.attach_terminal(channel_id, handle.clone()).await.is_err() {
                // Slot filled (or channel gone) since the check: this spawn lost.
                handle.terminate();
                return;
            }
            let registry = registry.clone();
            tokio::spawn(async move {
                let _ = exit_rx.await;
                registry.clear_terminal(channel_id).await;
            });
        }
        Err(e) => {
            error!(channel = %channel_id, error = %e, "terminal spawn failed");
            let _ = tx.send(AgentEvent::error(format!("Failed to start terminal: {e}")));
        }
    }
}

/// (Re-)arm the per-channel process snapshot job.
async fn handle_processes_watch(
    channel_id: Uuid,
    interval_secs: Option<u64>,
    registry: &SessionRegistry,
) {
    let interval = Duration::from_secs(interval_secs.unwrap_or(DEFAULT_WATCH_SECS).max(1));

    // Stop before start so the old job's executions can never interleave
    // with the new interval.
    registry.cancel_job(channel_id, PROCESS_WATCH_JOB).await;

    let job_registry = registry.clone();
    let job = jobs::schedule(PROCESS_WATCH_JOB, interval, move || {
        let registry = job_registry.clone();
        async move {
            let list = procs::top_processes().await?;
            registry.send(channel_id, AgentEvent::Processes { list }).await;
            Ok(())
        }
    });
    if registry.attach_job(channel_id, job.clone()).await.is_err() {
        // Channel closed while scheduling: nothing may keep firing for it.
        job.cancel();
    }
}

/// Stream a script's output to the channel, then report its exit code.
fn handle_script_run(path: String, tx: &mpsc::UnboundedSender<AgentEvent>) {
    let mut rx = match dispatch::stream(&path) {
        Ok(rx) => rx,
        Err(e) => {
            let _ = tx.send(AgentEvent::error(format!("Failed to run script: {e}")));
            return;
        }
    };
    let _ = tx.send(AgentEvent::ScriptOutput {
        data: format!("\n> Running: {path}\n"),
    });

    let tx = tx.clone();
    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            let forwarded = match chunk {
                ScriptChunk::Stdout(data) => AgentEvent::ScriptOutput { data },
                ScriptChunk::Stderr(data) => AgentEvent::ScriptOutput {
                    data: format!("[ERROR] {data}"),
                },
                ScriptChunk::Finished(code) => {
                    let _ = tx.send(AgentEvent::ScriptOutput {
                        data: format!("\n> Process finished with code {code}\n"),
                    });
                    let _ = tx.send(AgentEvent::ScriptFinished { code });
                    break;
                }
            };
            if tx.send(forwarded).is_err() {
                break;
            }
        }
    });
}
