//! Control channel client, used by the CLI and embedding applications

use std::path::PathBuf;

use eyre::{Context, Result, eyre};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::config::AppConfig;
use crate::workflow::Workflow;

use super::get_socket_path;
use super::messages::{ControlRequest, ControlResponse};

/// Client for the daemon's control socket.
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new() -> Self {
        Self {
            socket_path: get_socket_path(),
        }
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// One request/response exchange on a fresh connection.
    async fn request(&self, request: &ControlRequest) -> Result<ControlResponse> {
        debug!(socket_path = ?self.socket_path, "DaemonClient::request");
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .context("Failed to connect to daemon socket")?;
        let (read_half, mut write_half) = stream.into_split();

        let json = serde_json::to_string(request).context("Failed to serialize request")?;
        write_half.write_all(json.as_bytes()).await.context("Failed to send request")?;
        write_half.write_all(b"\n").await.context("Failed to send newline")?;
        write_half.flush().await.context("Failed to flush request")?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.context("Failed to read response")?;
        if line.is_empty() {
            return Err(eyre!("daemon closed the connection without a response"));
        }

        serde_json::from_str(line.trim()).context("Failed to parse response")
    }

    fn expect_ok(response: ControlResponse) -> Result<()> {
        match response {
            ControlResponse::Ok => Ok(()),
            ControlResponse::Error { message } => Err(eyre!(message)),
            other => Err(eyre!("unexpected response: {other:?}")),
        }
    }

    /// Start a run; returns the run id.
    pub async fn run(&self, workflow: Workflow, headless: bool, browser_config: Option<Value>) -> Result<String> {
        match self
            .request(&ControlRequest::Run {
                workflow,
                headless,
                browser_config,
            })
            .await?
        {
            ControlResponse::RunStarted { run_id } => Ok(run_id),
            ControlResponse::Error { message } => Err(eyre!(message)),
            other => Err(eyre!("unexpected response: {other:?}")),
        }
    }

    pub async fn stop(&self, workflow_id: &str) -> Result<()> {
        Self::expect_ok(
            self.request(&ControlRequest::Stop {
                workflow_id: workflow_id.to_string(),
            })
            .await?,
        )
    }

    pub async fn set_current_workflow(&self, workflow_id: Option<String>) -> Result<()> {
        Self::expect_ok(self.request(&ControlRequest::SetCurrentWorkflow { workflow_id }).await?)
    }

    pub async fn rendezvous_reply(&self, request_id: &str, payload: Value) -> Result<()> {
        Self::expect_ok(
            self.request(&ControlRequest::RendezvousReply {
                request_id: request_id.to_string(),
                payload,
            })
            .await?,
        )
    }

    pub async fn get_config(&self) -> Result<AppConfig> {
        match self.request(&ControlRequest::GetConfig).await? {
            ControlResponse::Config { config } => Ok(config),
            ControlResponse::Error { message } => Err(eyre!(message)),
            other => Err(eyre!("unexpected response: {other:?}")),
        }
    }

    /// Liveness check; returns the daemon's version string.
    pub async fn ping(&self) -> Result<String> {
        match self.request(&ControlRequest::Ping).await? {
            ControlResponse::Pong { version } => Ok(version),
            ControlResponse::Error { message } => Err(eyre!(message)),
            other => Err(eyre!("unexpected response: {other:?}")),
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        Self::expect_ok(self.request(&ControlRequest::Shutdown).await?)
    }
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new()
    }
}
