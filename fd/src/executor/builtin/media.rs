//! Media transcoding through the process supervisor

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::executor::config::{required_string, resolved_f64, resolved_i64};
use crate::executor::{ModuleConfig, ModuleExecutor, ModuleResult};
use crate::process::{ProgressParser, SpawnSpec, bundled_or_path};

/// Transcode a media file with the bundled-or-PATH `ffmpeg`, streaming
/// throttled progress onto the telemetry stream.
pub struct TranscodeMediaExecutor;

impl TranscodeMediaExecutor {
    /// Ask `ffprobe` for the input's duration in seconds.
    async fn probe_duration(ctx: &ExecutionContext, input: &str, timeout: Duration) -> Option<Duration> {
        let spec = SpawnSpec {
            program: bundled_or_path("ffprobe"),
            args: vec![
                "-v".into(),
                "error".into(),
                "-show_entries".into(),
                "format=duration".into(),
                "-of".into(),
                "default=noprint_wrappers=1:nokey=1".into(),
                input.into(),
            ],
            timeout,
            owner_node_id: "transcode_media".into(),
        };
        let (summary, stdout) = ctx.processes().output(spec).await.ok()?;
        if !summary.success {
            return None;
        }
        stdout.trim().parse::<f64>().ok().map(Duration::from_secs_f64)
    }
}

#[async_trait]
impl ModuleExecutor for TranscodeMediaExecutor {
    fn module_type(&self) -> &'static str {
        "transcode_media"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let input = match required_string(config, ctx, "inputPath") {
            Ok(input) => input,
            Err(e) => return e.into(),
        };
        let output = match required_string(config, ctx, "outputPath") {
            Ok(output) => output,
            Err(e) => return e.into(),
        };
        let timeout = match resolved_i64(config, ctx, "timeout", 3600) {
            Ok(secs) => Duration::from_secs(secs.max(1) as u64),
            Err(e) => return e.into(),
        };
        if ctx.check_cancelled().is_err() {
            return ModuleResult::fail("cancelled");
        }

        // Total duration enables percentage progress; a config value wins,
        // then ffprobe, then no percentage at all.
        let total = match resolved_f64(config, ctx, "totalDuration", 0.0) {
            Ok(secs) if secs > 0.0 => Some(Duration::from_secs_f64(secs)),
            Ok(_) => Self::probe_duration(ctx, &input, Duration::from_secs(15)).await,
            Err(e) => return e.into(),
        };

        let mut args = vec!["-y".into(), "-i".into(), input.clone()];
        if let Some(Value::Array(extra)) = config.get("extraArgs") {
            for arg in extra {
                match ctx.resolve_to_string(arg) {
                    Ok(arg) => args.push(arg),
                    Err(e) => return EngineError::from(e).into(),
                }
            }
        }
        args.push(output.clone());

        let spec = SpawnSpec {
            program: bundled_or_path("ffmpeg"),
            args,
            timeout,
            owner_node_id: "transcode_media".into(),
        };

        let supervisor = ctx.processes().clone();
        let mut parser = ProgressParser::new(total);
        let progress_ctx = &*ctx;
        let outcome = supervisor
            .run(spec, |line| {
                if let Some(update) = parser.parse_line(line) {
                    progress_ctx.send_progress(&update.message(), None);
                }
            })
            .await;

        match outcome {
            Ok(summary) if summary.success => {
                ModuleResult::ok(format!("transcoded {input} -> {output}")).with_data(json!({ "output": output }))
            }
            Ok(summary) => ModuleResult::fail(format!(
                "ffmpeg exited with code {}",
                summary.code.map_or("unknown".to_string(), |c| c.to_string())
            )),
            Err(EngineError::Timeout(d)) => ModuleResult::fail(format!("transcode timed out after {}s", d.as_secs())),
            Err(e) => e.into(),
        }
    }
}
