//! Process supervisor - registration, stderr capture, timeouts, termination
//!
//! Every child process a workflow spawns goes through here so that
//! cancellation can reliably reap them: no live records remain once a run
//! ends. Each spawn carries an absolute wall-clock timeout; on breach
//! or cancellation the child is terminated with a short grace period before
//! being killed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::EngineError;

/// How long a terminated child may linger before it is force-killed.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Bookkeeping entry for one live child process.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub id: u64,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub owner_node_id: String,
}

/// What to spawn and how long it may run.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub owner_node_id: String,
}

/// Outcome of a supervised process that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSummary {
    pub code: Option<i32>,
    pub success: bool,
}

/// Tracks and terminates child processes. One instance per daemon, shared
/// by all runs through their contexts.
#[derive(Default)]
pub struct ProcessSupervisor {
    records: Mutex<HashMap<u64, ProcessRecord>>,
    next_id: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a child, stream its stderr lines into `on_stderr_line`, and
    /// wait for exit within `spec.timeout`.
    ///
    /// Lines are split on both `\n` and `\r` - transcoders rewrite their
    /// status line with bare carriage returns. On timeout the child is
    /// terminated (grace, then kill) and `EngineError::Timeout` is returned.
    pub async fn run<F>(&self, spec: SpawnSpec, mut on_stderr_line: F) -> Result<ExitSummary, EngineError>
    where
        F: FnMut(&str) + Send,
    {
        debug!(program = %spec.program.display(), ?spec.args, "ProcessSupervisor::run: spawning");
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::external_io(format!("failed to spawn {}: {e}", spec.program.display())))?;

        let id = self.register(child.id(), &spec.owner_node_id);
        let stderr = child.stderr.take();

        let waited = tokio::time::timeout(spec.timeout, async {
            if let Some(mut stderr) = stderr {
                let mut pending = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    match stderr.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => {
                            for &byte in &chunk[..n] {
                                if byte == b'\n' || byte == b'\r' {
                                    if !pending.is_empty() {
                                        let line = String::from_utf8_lossy(&pending);
                                        on_stderr_line(line.trim_end());
                                        pending.clear();
                                    }
                                } else {
                                    pending.push(byte);
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "ProcessSupervisor::run: stderr read failed");
                            break;
                        }
                    }
                }
                if !pending.is_empty() {
                    let line = String::from_utf8_lossy(&pending);
                    on_stderr_line(line.trim_end());
                }
            }
            child.wait().await
        })
        .await;

        match waited {
            Ok(Ok(status)) => {
                self.unregister(id);
                debug!(?status, "ProcessSupervisor::run: child exited");
                Ok(ExitSummary {
                    code: status.code(),
                    success: status.success(),
                })
            }
            Ok(Err(e)) => {
                self.unregister(id);
                Err(EngineError::external_io(format!("wait failed: {e}")))
            }
            Err(_) => {
                warn!(timeout = ?spec.timeout, "ProcessSupervisor::run: timed out, terminating");
                terminate_child(&mut child).await;
                self.unregister(id);
                Err(EngineError::Timeout(spec.timeout))
            }
        }
    }

    /// Spawn a child and capture its stdout (probe-style helpers). The same
    /// registration, timeout, and termination rules as [`run`] apply.
    ///
    /// [`run`]: Self::run
    pub async fn output(&self, spec: SpawnSpec) -> Result<(ExitSummary, String), EngineError> {
        debug!(program = %spec.program.display(), ?spec.args, "ProcessSupervisor::output: spawning");
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::external_io(format!("failed to spawn {}: {e}", spec.program.display())))?;

        let id = self.register(child.id(), &spec.owner_node_id);
        let stdout = child.stdout.take();

        let waited = tokio::time::timeout(spec.timeout, async {
            let mut captured = String::new();
            if let Some(mut stdout) = stdout {
                let _ = stdout.read_to_string(&mut captured).await;
            }
            (child.wait().await, captured)
        })
        .await;

        match waited {
            Ok((Ok(status), captured)) => {
                self.unregister(id);
                Ok((
                    ExitSummary {
                        code: status.code(),
                        success: status.success(),
                    },
                    captured,
                ))
            }
            Ok((Err(e), _)) => {
                self.unregister(id);
                Err(EngineError::external_io(format!("wait failed: {e}")))
            }
            Err(_) => {
                terminate_child(&mut child).await;
                self.unregister(id);
                Err(EngineError::Timeout(spec.timeout))
            }
        }
    }

    fn register(&self, pid: Option<u32>, owner_node_id: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = ProcessRecord {
            id,
            pid,
            started_at: Utc::now(),
            owner_node_id: owner_node_id.to_string(),
        };
        debug!(id, ?pid, %owner_node_id, "ProcessSupervisor::register");
        self.records.lock().expect("supervisor records poisoned").insert(id, record);
        id
    }

    fn unregister(&self, id: u64) {
        self.records.lock().expect("supervisor records poisoned").remove(&id);
    }

    /// Number of live records.
    pub fn count(&self) -> usize {
        self.records.lock().expect("supervisor records poisoned").len()
    }

    /// Snapshot of live records (diagnostics).
    pub fn records(&self) -> Vec<ProcessRecord> {
        self.records
            .lock()
            .expect("supervisor records poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Terminate every live child: SIGTERM, wait the grace window, then
    /// SIGKILL whatever is left. Used by the cancellation path.
    pub async fn terminate_all(&self) {
        let drained: Vec<ProcessRecord> = self
            .records
            .lock()
            .expect("supervisor records poisoned")
            .drain()
            .map(|(_, r)| r)
            .collect();

        if drained.is_empty() {
            return;
        }
        debug!(count = drained.len(), "ProcessSupervisor::terminate_all");

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            for record in &drained {
                if let Some(pid) = record.pid {
                    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
                }
            }
            tokio::time::sleep(TERMINATE_GRACE).await;
            for record in &drained {
                if let Some(pid) = record.pid {
                    // ESRCH means it already exited; ignore.
                    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
                }
            }
        }
    }
}

/// Terminate one child: SIGTERM, grace window, then kill.
async fn terminate_child(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok() {
            return;
        }
        warn!(pid, "terminate_child: grace window elapsed, killing");
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> SpawnSpec {
        SpawnSpec {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), script.into()],
            timeout,
            owner_node_id: "test-node".into(),
        }
    }

    #[tokio::test]
    async fn test_successful_exit() {
        let supervisor = ProcessSupervisor::new();
        let summary = supervisor
            .run(sh("exit 0", Duration::from_secs(5)), |_| {})
            .await
            .unwrap();
        assert!(summary.success);
        assert_eq!(summary.code, Some(0));
        assert_eq!(supervisor.count(), 0);
    }

    #[tokio::test]
    async fn test_failing_exit_code() {
        let supervisor = ProcessSupervisor::new();
        let summary = supervisor
            .run(sh("exit 3", Duration::from_secs(5)), |_| {})
            .await
            .unwrap();
        assert!(!summary.success);
        assert_eq!(summary.code, Some(3));
        assert_eq!(supervisor.count(), 0);
    }

    #[tokio::test]
    async fn test_stderr_lines_delivered() {
        let supervisor = ProcessSupervisor::new();
        let mut lines = Vec::new();
        supervisor
            .run(sh("printf 'one\\ntwo\\n' >&2", Duration::from_secs(5)), |line| {
                lines.push(line.to_string());
            })
            .await
            .unwrap();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_carriage_return_splits_lines() {
        let supervisor = ProcessSupervisor::new();
        let mut lines = Vec::new();
        supervisor
            .run(sh("printf 'a\\rb\\rc\\n' >&2", Duration::from_secs(5)), |line| {
                lines.push(line.to_string());
            })
            .await
            .unwrap();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_timeout_terminates_and_unregisters() {
        let supervisor = ProcessSupervisor::new();
        let result = supervisor
            .run(sh("sleep 30", Duration::from_millis(100)), |_| {})
            .await;
        assert!(matches!(result, Err(EngineError::Timeout(_))));
        assert_eq!(supervisor.count(), 0);
    }

    #[tokio::test]
    async fn test_missing_program_is_external_io() {
        let supervisor = ProcessSupervisor::new();
        let spec = SpawnSpec {
            program: PathBuf::from("/no/such/binary"),
            args: vec![],
            timeout: Duration::from_secs(1),
            owner_node_id: "n".into(),
        };
        let result = supervisor.run(spec, |_| {}).await;
        assert!(matches!(result, Err(EngineError::ExternalIo(_))));
        assert_eq!(supervisor.count(), 0);
    }

    #[tokio::test]
    async fn test_output_captures_stdout() {
        let supervisor = ProcessSupervisor::new();
        let spec = SpawnSpec {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), "echo 12.5".into()],
            timeout: Duration::from_secs(5),
            owner_node_id: "probe".into(),
        };
        let (summary, stdout) = supervisor.output(spec).await.unwrap();
        assert!(summary.success);
        assert_eq!(stdout.trim(), "12.5");
        assert_eq!(supervisor.count(), 0);
    }

    #[tokio::test]
    async fn test_terminate_all_reaps_children() {
        let supervisor = std::sync::Arc::new(ProcessSupervisor::new());

        let background = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.run(sh("sleep 30", Duration::from_secs(60)), |_| {}).await })
        };

        // Wait for the child to register.
        for _ in 0..50 {
            if supervisor.count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(supervisor.count(), 1);

        supervisor.terminate_all().await;
        assert_eq!(supervisor.count(), 0);

        // The supervised run observes the termination as a non-success exit.
        let result = tokio::time::timeout(Duration::from_secs(5), background)
            .await
            .expect("run should return after terminate_all")
            .unwrap();
        match result {
            Ok(summary) => assert!(!summary.success),
            Err(_) => {} // wait error is also acceptable after a kill
        }
    }

    #[tokio::test]
    async fn test_records_snapshot_carries_owner() {
        let supervisor = std::sync::Arc::new(ProcessSupervisor::new());
        let handle = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move {
                supervisor
                    .run(sh("sleep 1", Duration::from_secs(5)), |_| {})
                    .await
            })
        };
        for _ in 0..50 {
            if supervisor.count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let records = supervisor.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].owner_node_id, "test-node");
        supervisor.terminate_all().await;
        let _ = handle.await;
    }
}
