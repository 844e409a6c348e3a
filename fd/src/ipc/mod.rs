//! Control channel - JSON-lines protocol over a Unix domain socket
//!
//! Observers connect here to start and stop runs, answer rendezvous
//! requests, and subscribe to the telemetry stream. The transport is
//! deliberately thin; the message vocabulary is the interface.

mod client;
mod listener;
mod messages;

pub use client::DaemonClient;
pub use listener::{cleanup_socket, create_listener, create_listener_at, serve};
pub use messages::{ControlRequest, ControlResponse};

use std::path::PathBuf;

/// Default daemon socket path under the platform data-local directory.
pub fn get_socket_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flowdaemon")
        .join("daemon.sock")
}
