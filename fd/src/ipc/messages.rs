//! Control message types
//!
//! One JSON object per line in each direction. Telemetry events stream as
//! their own serialized form after a `Subscribe` request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;
use crate::workflow::Workflow;

/// Requests from observers/CLI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlRequest {
    /// Start a run of the given workflow.
    Run {
        workflow: Workflow,
        #[serde(default)]
        headless: bool,
        #[serde(default)]
        browser_config: Option<Value>,
    },

    /// Request a cooperative stop of a running workflow.
    Stop { workflow_id: String },

    /// Bind the hotkey bridge to a workflow (or unbind with null).
    SetCurrentWorkflow { workflow_id: Option<String> },

    /// Observer answers a pending rendezvous request.
    RendezvousReply { request_id: String, payload: Value },

    /// Fetch the effective daemon configuration.
    GetConfig,

    /// Turn this connection into a telemetry event stream.
    Subscribe,

    /// Liveness check.
    Ping,

    /// Ask the daemon to shut down gracefully.
    Shutdown,
}

/// Responses from the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlResponse {
    Ok,
    RunStarted { run_id: String },
    Config { config: AppConfig },
    Pong { version: String },
    Error { message: String },
}
