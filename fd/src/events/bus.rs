//! Event bus - fan-out of telemetry events to observers
//!
//! Built on a tokio broadcast channel: the scheduler and services emit,
//! observers (control-channel connections, loggers, tests) subscribe.
//! Emission is fire-and-forget; with no subscribers events are dropped.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;
use valuestore::LogLevel;

use super::types::{FlowEvent, RendezvousCategory, RunStatus};

/// Default channel capacity (events). A noisy run emits a handful of events
/// per node; this buffers thousands of nodes for a slow observer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Central telemetry bus.
pub struct EventBus {
    tx: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers. No subscribers is fine; a full
    /// channel drops the oldest events for lagging receivers.
    pub fn emit(&self, event: FlowEvent) {
        debug!(event_type = event.event_type(), run_id = event.run_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }

    /// Emitter handle bound to one run id.
    pub fn emitter_for(&self, run_id: impl Into<String>) -> EventEmitter {
        EventEmitter {
            tx: self.tx.clone(),
            run_id: run_id.into(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Cheap-to-clone handle for emitting events with a pre-set run id.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<FlowEvent>,
    run_id: String,
}

impl EventEmitter {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, event: FlowEvent) {
        let _ = self.tx.send(event);
    }

    pub fn node_start(&self, node_id: &str, module_type: &str, config_preview: &str) {
        self.emit(FlowEvent::NodeStart {
            run_id: self.run_id.clone(),
            node_id: node_id.to_string(),
            module_type: module_type.to_string(),
            config_preview: config_preview.to_string(),
        });
    }

    pub fn node_end(
        &self,
        node_id: &str,
        success: bool,
        message: &str,
        duration_ms: u64,
        error: Option<String>,
        log_level: Option<LogLevel>,
    ) {
        self.emit(FlowEvent::NodeEnd {
            run_id: self.run_id.clone(),
            node_id: node_id.to_string(),
            success,
            message: message.to_string(),
            duration_ms,
            error,
            log_level,
        });
    }

    pub fn log(&self, level: LogLevel, message: &str, node_id: Option<String>, duration_ms: Option<u64>) {
        self.emit(FlowEvent::Log {
            run_id: self.run_id.clone(),
            timestamp: chrono::Utc::now(),
            level,
            message: message.to_string(),
            node_id,
            duration_ms,
        });
    }

    pub fn progress(&self, message: &str, node_id: Option<String>) {
        self.emit(FlowEvent::Progress {
            run_id: self.run_id.clone(),
            node_id,
            message: message.to_string(),
        });
    }

    pub fn variable_update(&self, name: &str, value: Value) {
        self.emit(FlowEvent::VariableUpdate {
            run_id: self.run_id.clone(),
            name: name.to_string(),
            value,
        });
    }

    pub fn run_end(&self, status: RunStatus, executed_count: u64, failed_count: u64, error: Option<String>) {
        self.emit(FlowEvent::RunEnd {
            run_id: self.run_id.clone(),
            status,
            executed_count,
            failed_count,
            error,
        });
    }

    pub fn rendezvous_request(&self, category: RendezvousCategory, request_id: &str, payload: Value) {
        self.emit(FlowEvent::RendezvousRequest {
            run_id: self.run_id.clone(),
            category,
            request_id: request_id.to_string(),
            payload,
        });
    }

    pub fn rendezvous_reply(&self, request_id: &str) {
        self.emit(FlowEvent::RendezvousReply {
            run_id: self.run_id.clone(),
            request_id: request_id.to_string(),
        });
    }
}

/// Create a bus wrapped in an `Arc` for shared ownership.
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}
