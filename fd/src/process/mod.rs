//! External-process lifecycle control
//!
//! The supervisor tracks every child process a workflow spawns (media
//! transcoders and friends), parses their stderr for progress tokens, and
//! guarantees none outlive the run.

mod progress;
mod supervisor;

pub use progress::{PROGRESS_EMIT_INTERVAL, ProgressParser, ProgressUpdate};
pub use supervisor::{ExitSummary, ProcessRecord, ProcessSupervisor, SpawnSpec, TERMINATE_GRACE};

use std::path::PathBuf;

/// Locate a bundled helper executable (`ffmpeg`, `ffprobe`, `m3u8`).
///
/// Executables shipped beside the process binary take precedence; otherwise
/// the bare name is returned and resolution falls back to `PATH`.
pub fn bundled_or_path(name: &str) -> PathBuf {
    let file_name = if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    };
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let bundled = dir.join(&file_name);
            if bundled.exists() {
                return bundled;
            }
        }
    }
    PathBuf::from(name)
}
