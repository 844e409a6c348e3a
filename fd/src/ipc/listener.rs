//! Daemon-side control channel listener
//!
//! Accepts Unix-socket connections carrying JSON-lines control requests.
//! A `Subscribe` request flips the connection into a one-way telemetry
//! stream until the client disconnects.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bus::EngineBus;

use super::get_socket_path;
use super::messages::{ControlRequest, ControlResponse};

/// Maximum request size. Workflow definitions ride in `Run` requests, so
/// this is generous.
const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Create and bind the daemon's control socket, cleaning up stale socket
/// files from previous runs.
pub fn create_listener() -> Result<(UnixListener, PathBuf)> {
    let socket_path = get_socket_path();
    create_listener_at(&socket_path)
}

/// Create a listener at a specific path (tests).
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener: binding control socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }
    if socket_path.exists() {
        debug!(?socket_path, "create_listener: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind control socket")?;
    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file on shutdown.
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Accept-loop: one task per connection, until a shutdown signal arrives.
/// `shutdown_tx` lets a connection's `Shutdown` request stop the daemon.
pub async fn serve(
    listener: UnixListener,
    bus: Arc<EngineBus>,
    shutdown_tx: mpsc::Sender<()>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("serve: shutdown signal received");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let bus = bus.clone();
                    let shutdown_tx = shutdown_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, bus, shutdown_tx).await {
                            debug!(error = %e, "connection handler ended with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "serve: accept failed");
                }
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, bus: Arc<EngineBus>, shutdown_tx: mpsc::Sender<()>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await.context("Failed to read request")?;
        if bytes_read == 0 {
            return Ok(());
        }
        if bytes_read > MAX_MESSAGE_SIZE {
            send(&mut write_half, &ControlResponse::Error {
                message: format!("request too large: {bytes_read} bytes"),
            })
            .await?;
            continue;
        }

        let request: ControlRequest = match serde_json::from_str(line.trim()) {
            Ok(request) => request,
            Err(e) => {
                send(&mut write_half, &ControlResponse::Error {
                    message: format!("malformed request: {e}"),
                })
                .await?;
                continue;
            }
        };
        debug!(request = ?request_name(&request), "handle_connection: request");

        match request {
            ControlRequest::Run {
                workflow,
                headless,
                browser_config,
            } => {
                let response = match bus.start_run(workflow, headless, browser_config) {
                    Ok((run_id, _handle)) => ControlResponse::RunStarted { run_id },
                    Err(e) => ControlResponse::Error { message: e.to_string() },
                };
                send(&mut write_half, &response).await?;
            }
            ControlRequest::Stop { workflow_id } => {
                let stopped = bus.stop_run(&workflow_id).await;
                let response = if stopped {
                    ControlResponse::Ok
                } else {
                    ControlResponse::Error {
                        message: format!("workflow {workflow_id} is not running"),
                    }
                };
                send(&mut write_half, &response).await?;
            }
            ControlRequest::SetCurrentWorkflow { workflow_id } => {
                bus.set_current_workflow(workflow_id);
                send(&mut write_half, &ControlResponse::Ok).await?;
            }
            ControlRequest::RendezvousReply { request_id, payload } => {
                // Late replies are ignored, not errors.
                bus.rendezvous_reply(&request_id, payload);
                send(&mut write_half, &ControlResponse::Ok).await?;
            }
            ControlRequest::GetConfig => {
                send(&mut write_half, &ControlResponse::Config {
                    config: bus.config().clone(),
                })
                .await?;
            }
            ControlRequest::Subscribe => {
                send(&mut write_half, &ControlResponse::Ok).await?;
                return stream_events(write_half, &bus).await;
            }
            ControlRequest::Ping => {
                send(&mut write_half, &ControlResponse::Pong {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                })
                .await?;
            }
            ControlRequest::Shutdown => {
                send(&mut write_half, &ControlResponse::Ok).await?;
                let _ = shutdown_tx.send(()).await;
                return Ok(());
            }
        }
    }
}

/// Forward telemetry events as JSON lines until the client disconnects.
async fn stream_events(
    mut write_half: tokio::net::unix::OwnedWriteHalf,
    bus: &Arc<EngineBus>,
) -> Result<()> {
    let mut rx = bus.event_bus().subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => {
                let json = serde_json::to_string(&event).context("Failed to serialize event")?;
                if write_half.write_all(json.as_bytes()).await.is_err()
                    || write_half.write_all(b"\n").await.is_err()
                {
                    return Ok(());
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "observer lagged, events dropped");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

async fn send(write_half: &mut tokio::net::unix::OwnedWriteHalf, response: &ControlResponse) -> Result<()> {
    let json = serde_json::to_string(response).context("Failed to serialize response")?;
    write_half.write_all(json.as_bytes()).await.context("Failed to write response")?;
    write_half.write_all(b"\n").await.context("Failed to write newline")?;
    write_half.flush().await.context("Failed to flush response")?;
    Ok(())
}

fn request_name(request: &ControlRequest) -> &'static str {
    match request {
        ControlRequest::Run { .. } => "Run",
        ControlRequest::Stop { .. } => "Stop",
        ControlRequest::SetCurrentWorkflow { .. } => "SetCurrentWorkflow",
        ControlRequest::RendezvousReply { .. } => "RendezvousReply",
        ControlRequest::GetConfig => "GetConfig",
        ControlRequest::Subscribe => "Subscribe",
        ControlRequest::Ping => "Ping",
        ControlRequest::Shutdown => "Shutdown",
    }
}
