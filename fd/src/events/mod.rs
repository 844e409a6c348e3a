//! Telemetry stream - events, bus, and per-run emitters

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use types::{EventLogEntry, FlowEvent, RendezvousCategory, RunStatus};
