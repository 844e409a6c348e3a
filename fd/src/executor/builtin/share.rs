//! Auxiliary server modules - file share and screen share lifecycle

use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;

use crate::context::ExecutionContext;
use crate::executor::config::{required_string, resolved_bool, resolved_f64, resolved_i64, resolved_string};
use crate::executor::{ModuleConfig, ModuleExecutor, ModuleResult};
use crate::servers::{FileShareConfig, ScreenShareConfig, estimate_bandwidth};

const DEFAULT_FILE_SHARE_PORT: i64 = 8100;
const DEFAULT_SCREEN_SHARE_PORT: i64 = 8200;

/// Serve a folder or single file over HTTP.
pub struct StartFileShareExecutor;

#[async_trait]
impl ModuleExecutor for StartFileShareExecutor {
    fn module_type(&self) -> &'static str {
        "start_file_share"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let path = match required_string(config, ctx, "path") {
            Ok(path) => path,
            Err(e) => return e.into(),
        };
        let port = match resolved_i64(config, ctx, "port", DEFAULT_FILE_SHARE_PORT) {
            Ok(port) => port as u16,
            Err(e) => return e.into(),
        };
        let name = match resolved_string(config, ctx, "name", "shared") {
            Ok(name) => name,
            Err(e) => return e.into(),
        };
        let allow_write = match resolved_bool(config, ctx, "allowWrite", false) {
            Ok(allow_write) => allow_write,
            Err(e) => return e.into(),
        };

        let share = FileShareConfig {
            root: PathBuf::from(&path),
            name,
            allow_write,
        };
        match ctx.servers().start_file_share(port, share).await {
            Ok(()) => ModuleResult::ok(format!("file share started on port {port}: {path}"))
                .with_data(json!({ "port": port })),
            Err(e) => e.into(),
        }
    }
}

/// Stop a running file share.
pub struct StopFileShareExecutor;

#[async_trait]
impl ModuleExecutor for StopFileShareExecutor {
    fn module_type(&self) -> &'static str {
        "stop_file_share"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let port = match resolved_i64(config, ctx, "port", DEFAULT_FILE_SHARE_PORT) {
            Ok(port) => port as u16,
            Err(e) => return e.into(),
        };
        if ctx.servers().stop(port).await {
            ModuleResult::ok(format!("file share on port {port} stopped"))
        } else {
            ModuleResult::fail(format!("no server running on port {port}"))
        }
    }
}

/// Push periodic screen frames to clients.
pub struct StartScreenShareExecutor;

#[async_trait]
impl ModuleExecutor for StartScreenShareExecutor {
    fn module_type(&self) -> &'static str {
        "start_screen_share"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let port = match resolved_i64(config, ctx, "port", DEFAULT_SCREEN_SHARE_PORT) {
            Ok(port) => port as u16,
            Err(e) => return e.into(),
        };
        let fps = match resolved_i64(config, ctx, "fps", 10) {
            Ok(fps) => fps.clamp(1, 60) as u32,
            Err(e) => return e.into(),
        };
        let quality = match resolved_i64(config, ctx, "quality", 60) {
            Ok(quality) => quality.clamp(1, 100) as u8,
            Err(e) => return e.into(),
        };
        let scale = match resolved_f64(config, ctx, "scale", 0.75) {
            Ok(scale) => scale.clamp(0.1, 1.0),
            Err(e) => return e.into(),
        };

        let share = ScreenShareConfig { fps, quality, scale };
        let source = ctx.servers().frame_source();
        match ctx.servers().start_screen_share(port, share, source).await {
            Ok(()) => {
                let bandwidth = estimate_bandwidth(fps, quality, scale);
                ModuleResult::ok(format!(
                    "screen share started on port {port} ({fps}fps, quality {quality}, {bandwidth})"
                ))
                .with_data(json!({ "port": port, "bandwidth": bandwidth }))
            }
            Err(e) => e.into(),
        }
    }
}

/// Stop a running screen share.
pub struct StopScreenShareExecutor;

#[async_trait]
impl ModuleExecutor for StopScreenShareExecutor {
    fn module_type(&self) -> &'static str {
        "stop_screen_share"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let port = match resolved_i64(config, ctx, "port", DEFAULT_SCREEN_SHARE_PORT) {
            Ok(port) => port as u16,
            Err(e) => return e.into(),
        };
        if ctx.servers().stop(port).await {
            ModuleResult::ok(format!("screen share on port {port} stopped"))
        } else {
            ModuleResult::fail(format!("no server running on port {port}"))
        }
    }
}
