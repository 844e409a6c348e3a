//! Telemetry event types
//!
//! These events are the complete observable vocabulary of a run:
//! - Node lifecycle (`node:start`, `node:end`)
//! - Log lines and free-form progress messages
//! - Variable updates performed by executors
//! - Run termination (`run:end`, emitted exactly once per run)
//! - Rendezvous requests awaiting an observer-side reply

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use valuestore::LogLevel;

/// Terminal status of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Stopped,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Request category of a rendezvous. The registry is semantically identical
/// per category; the tag exists for diagnostics and observer routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RendezvousCategory {
    InputPrompt,
    TextToSpeech,
    ScriptEval,
    MediaPlayback,
    ImageView,
}

impl std::fmt::Display for RendezvousCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InputPrompt => "input-prompt",
            Self::TextToSpeech => "text-to-speech",
            Self::ScriptEval => "script-eval",
            Self::MediaPlayback => "media-playback",
            Self::ImageView => "image-view",
        };
        f.write_str(s)
    }
}

/// One telemetry event. Fanned out to every attached observer; within one
/// observer the order matches scheduler order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    /// A node has been dispatched.
    #[serde(rename = "node:start")]
    NodeStart {
        run_id: String,
        node_id: String,
        module_type: String,
        /// Truncated rendering of the node config for display.
        config_preview: String,
    },

    /// A node finished (successfully or not).
    #[serde(rename = "node:end")]
    NodeEnd {
        run_id: String,
        node_id: String,
        success: bool,
        message: String,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        log_level: Option<LogLevel>,
    },

    /// A log line.
    #[serde(rename = "log")]
    Log {
        run_id: String,
        timestamp: DateTime<Utc>,
        level: LogLevel,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },

    /// Free-form progress from a long-running operation.
    #[serde(rename = "progress")]
    Progress {
        run_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
        message: String,
    },

    /// An executor wrote a variable via `set`.
    #[serde(rename = "variable:update")]
    VariableUpdate { run_id: String, name: String, value: Value },

    /// The run ended. Always emitted, whatever the outcome.
    #[serde(rename = "run:end")]
    RunEnd {
        run_id: String,
        status: RunStatus,
        executed_count: u64,
        failed_count: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A worker is blocked awaiting an observer-side reply.
    #[serde(rename = "rendezvous:request")]
    RendezvousRequest {
        run_id: String,
        category: RendezvousCategory,
        request_id: String,
        payload: Value,
    },

    /// An observer reply was delivered to a pending rendezvous.
    #[serde(rename = "rendezvous:reply")]
    RendezvousReply { run_id: String, request_id: String },

    /// A global hotkey fired. `run_id` carries the bound workflow id (empty
    /// when none is bound); observers react to `macro_start`/`macro_stop`.
    #[serde(rename = "hotkey")]
    Hotkey { run_id: String, command: String },
}

impl FlowEvent {
    pub fn run_id(&self) -> &str {
        match self {
            FlowEvent::NodeStart { run_id, .. }
            | FlowEvent::NodeEnd { run_id, .. }
            | FlowEvent::Log { run_id, .. }
            | FlowEvent::Progress { run_id, .. }
            | FlowEvent::VariableUpdate { run_id, .. }
            | FlowEvent::RunEnd { run_id, .. }
            | FlowEvent::RendezvousRequest { run_id, .. }
            | FlowEvent::RendezvousReply { run_id, .. }
            | FlowEvent::Hotkey { run_id, .. } => run_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            FlowEvent::NodeStart { .. } => "node:start",
            FlowEvent::NodeEnd { .. } => "node:end",
            FlowEvent::Log { .. } => "log",
            FlowEvent::Progress { .. } => "progress",
            FlowEvent::VariableUpdate { .. } => "variable:update",
            FlowEvent::RunEnd { .. } => "run:end",
            FlowEvent::RendezvousRequest { .. } => "rendezvous:request",
            FlowEvent::RendezvousReply { .. } => "rendezvous:reply",
            FlowEvent::Hotkey { .. } => "hotkey",
        }
    }
}

/// A timestamped event for JSONL persistence or observer replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: FlowEvent,
}

impl EventLogEntry {
    pub fn new(event: FlowEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_id_accessor() {
        let event = FlowEvent::Progress {
            run_id: "r1".into(),
            node_id: None,
            message: "working".into(),
        };
        assert_eq!(event.run_id(), "r1");
    }

    #[test]
    fn test_event_type_names() {
        let event = FlowEvent::VariableUpdate {
            run_id: "r1".into(),
            name: "x".into(),
            value: json!(1),
        };
        assert_eq!(event.event_type(), "variable:update");
    }

    #[test]
    fn test_serialization_tag() {
        let event = FlowEvent::NodeEnd {
            run_id: "r1".into(),
            node_id: "n1".into(),
            success: false,
            message: String::new(),
            duration_ms: 17,
            error: Some("boom".into()),
            log_level: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"node:end""#));
        assert!(json.contains(r#""error":"boom""#));
        assert!(!json.contains("log_level"));

        let parsed: FlowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type(), "node:end");
    }

    #[test]
    fn test_rendezvous_category_rendering() {
        let event = FlowEvent::RendezvousRequest {
            run_id: "r1".into(),
            category: RendezvousCategory::InputPrompt,
            request_id: "req-1".into(),
            payload: json!({"title": "Name?"}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""category":"input-prompt""#));
    }

    #[test]
    fn test_run_status_display() {
        assert_eq!(RunStatus::Stopped.to_string(), "stopped");
        let json = serde_json::to_string(&RunStatus::Completed).unwrap();
        assert_eq!(json, r#""completed""#);
    }

    #[test]
    fn test_event_log_entry() {
        let entry = EventLogEntry::new(FlowEvent::Progress {
            run_id: "r1".into(),
            node_id: Some("n1".into()),
            message: "50%".into(),
        });
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("ts"));
        assert!(json.contains("progress"));
    }
}
