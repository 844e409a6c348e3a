//! External server manager
//!
//! Workflows may start optional auxiliary HTTP servers (file share, screen
//! share). The manager keys them by TCP port, guarantees at most one server
//! per port, and shuts them down gracefully on `stop` or daemon shutdown.

mod file_share;
mod screen_share;

pub use file_share::{FileShareConfig, file_share_router, format_size};
pub use screen_share::{FrameSource, ScreenShareConfig, TestPatternSource, estimate_bandwidth, screen_share_router};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::EngineError;

/// What kind of server occupies a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    FileShare,
    ScreenShare,
}

struct ServerHandle {
    kind: ServerKind,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Port-keyed registry of running auxiliary servers.
pub struct ServerManager {
    servers: Mutex<HashMap<u16, ServerHandle>>,
    /// Capture backend handed to new screen shares. Defaults to the
    /// synthetic test pattern; the embedding application injects the real
    /// OS capture implementation.
    frame_source: Mutex<Arc<dyn FrameSource>>,
}

impl Default for ServerManager {
    fn default() -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
            frame_source: Mutex::new(Arc::new(screen_share::TestPatternSource)),
        }
    }
}

impl ServerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The capture backend for new screen shares.
    pub fn frame_source(&self) -> Arc<dyn FrameSource> {
        self.frame_source.lock().expect("frame source poisoned").clone()
    }

    /// Inject a capture backend (the default serves a test pattern).
    pub fn set_frame_source(&self, source: Arc<dyn FrameSource>) {
        *self.frame_source.lock().expect("frame source poisoned") = source;
    }

    /// Start a file share on `port`. Fails if the port is already managed
    /// or cannot be bound.
    pub async fn start_file_share(&self, port: u16, config: FileShareConfig) -> Result<(), EngineError> {
        let router = file_share_router(config)?;
        self.start(port, ServerKind::FileShare, router).await
    }

    /// Start a screen share on `port` pushing frames from `source`.
    pub async fn start_screen_share(
        &self,
        port: u16,
        config: ScreenShareConfig,
        source: Arc<dyn FrameSource>,
    ) -> Result<(), EngineError> {
        let router = screen_share_router(config, source);
        self.start(port, ServerKind::ScreenShare, router).await
    }

    async fn start(&self, port: u16, kind: ServerKind, router: axum::Router) -> Result<(), EngineError> {
        {
            let servers = self.servers.lock().expect("server map poisoned");
            if servers.contains_key(&port) {
                return Err(EngineError::validation(format!("port {port} already has a server")));
            }
        }

        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| EngineError::external_io(format!("cannot bind port {port}: {e}")))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                warn!(error = %e, "auxiliary server exited with error");
            }
        });

        debug!(port, ?kind, "ServerManager::start");
        self.servers.lock().expect("server map poisoned").insert(
            port,
            ServerHandle {
                kind,
                shutdown: shutdown_tx,
                task,
            },
        );
        Ok(())
    }

    /// Stop the server on `port`. Returns whether one was running.
    pub async fn stop(&self, port: u16) -> bool {
        let handle = self.servers.lock().expect("server map poisoned").remove(&port);
        match handle {
            Some(handle) => {
                debug!(port, kind = ?handle.kind, "ServerManager::stop");
                let _ = handle.shutdown.send(());
                let _ = handle.task.await;
                true
            }
            None => false,
        }
    }

    /// Stop every running server (daemon shutdown).
    pub async fn stop_all(&self) {
        let drained: Vec<(u16, ServerHandle)> = self
            .servers
            .lock()
            .expect("server map poisoned")
            .drain()
            .collect();
        for (port, handle) in drained {
            debug!(port, "ServerManager::stop_all: stopping");
            let _ = handle.shutdown.send(());
            let _ = handle.task.await;
        }
    }

    /// Currently-managed ports and their kinds.
    pub fn active(&self) -> Vec<(u16, ServerKind)> {
        self.servers
            .lock()
            .expect("server map poisoned")
            .iter()
            .map(|(port, handle)| (*port, handle.kind))
            .collect()
    }

    pub fn is_running(&self, port: u16) -> bool {
        self.servers.lock().expect("server map poisoned").contains_key(&port)
    }
}
