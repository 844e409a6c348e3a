//! FlowDaemon - node-graph workflow execution engine for visual RPA
//!
//! FlowDaemon interprets a directed graph of typed modules connected by
//! data and control edges, while coordinating long-running external
//! collaborators (browser automation, child processes, observer-side
//! dialogs, auxiliary HTTP servers) and streaming live execution telemetry
//! to attached observers.
//!
//! # Core concepts
//!
//! - **One run, one context**: every run owns its mutable state and is
//!   driven by a single cooperative worker; concurrency exists only at the
//!   boundaries.
//! - **Late binding**: node configs resolve their variable references at
//!   execution time, so loop bodies see each iteration's values.
//! - **Cooperative cancellation**: a stop sets a flag, wakes every blocked
//!   rendezvous, and terminates child processes; the worker observes the
//!   flag at its next suspension point.
//!
//! # Modules
//!
//! - [`workflow`] - the static node-and-edge graph model
//! - [`engine`] - the scheduler and loop protocol
//! - [`context`] - per-run mutable state
//! - [`executor`] - the module-executor contract, registry, and built-ins
//! - [`events`] - the telemetry stream
//! - [`rendezvous`] - worker/observer request-reply correlation
//! - [`process`] - child-process supervision and progress parsing
//! - [`servers`] - optional file-share and screen-share servers
//! - [`hotkey`] - the OS-global hotkey bridge
//! - [`bus`] - run lifecycle and control-command handling
//! - [`ipc`] - the JSON-lines control channel

pub mod bus;
pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod hotkey;
pub mod ipc;
pub mod process;
pub mod rendezvous;
pub mod servers;
pub mod workflow;

// Re-export commonly used types
pub use bus::EngineBus;
pub use config::{AppConfig, BackendConfig, ConfigError, EndpointConfig};
pub use context::{BrowserHandle, CancelFlag, ExecutionContext, PageHandle, RunServices};
pub use engine::{LoopErrorPolicy, LoopFrame, LoopKind, RunSummary, Scheduler};
pub use error::{EngineError, ErrorKind};
pub use events::{EventBus, EventEmitter, FlowEvent, RendezvousCategory, RunStatus};
pub use executor::{ExecutorRegistry, ModuleExecutor, ModuleResult};
pub use hotkey::{HotkeyBindings, HotkeyBridge, HotkeyCommand};
pub use ipc::{ControlRequest, ControlResponse, DaemonClient};
pub use process::{ProcessSupervisor, ProgressParser, ProgressUpdate, SpawnSpec};
pub use rendezvous::{RendezvousError, RendezvousRegistry};
pub use servers::{FileShareConfig, FrameSource, ScreenShareConfig, ServerManager};
pub use workflow::{Edge, Node, Workflow};
