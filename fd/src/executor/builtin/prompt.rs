//! Observer-side affordance modules
//!
//! These modules block on the rendezvous registry: the request goes out on
//! the telemetry stream, an observer (typically the UI) performs the action
//! and replies through the control channel, and the worker resumes. Every
//! wait is bounded and cancellation-aware.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::context::ExecutionContext;
use crate::events::RendezvousCategory;
use crate::executor::config::{required_string, resolved_bool, resolved_f64, resolved_i64, resolved_string};
use crate::executor::{ModuleConfig, ModuleExecutor, ModuleResult};
use crate::rendezvous::RendezvousError;

/// Register, dispatch, await. Returns the observer's reply, or the failure
/// result to report on the node.
async fn rendezvous_roundtrip(
    ctx: &ExecutionContext,
    category: RendezvousCategory,
    mut payload: Value,
    timeout: Duration,
) -> Result<Value, ModuleResult> {
    if ctx.check_cancelled().is_err() {
        return Err(ModuleResult::fail("cancelled"));
    }

    let registry = ctx.rendezvous().clone();
    let (id, rx) = registry.register(category);
    payload["requestId"] = json!(id.to_string());
    if let Some(emitter) = ctx.emitter() {
        registry.dispatch(emitter, category, id, payload);
    }

    match registry.await_reply(id, rx, timeout).await {
        Ok(reply) => {
            if let Some(emitter) = ctx.emitter() {
                emitter.rendezvous_reply(&id.to_string());
            }
            Ok(reply)
        }
        Err(RendezvousError::Timeout(d)) => Err(ModuleResult::fail(format!("no reply within {}s", d.as_secs()))),
        Err(RendezvousError::Cancelled(reason)) => Err(ModuleResult::fail(format!("cancelled: {reason}"))),
        Err(RendezvousError::Closed) => Err(ModuleResult::fail("reply channel closed")),
    }
}

/// Prompt the operator for a value and store it in a variable.
pub struct InputPromptExecutor;

#[async_trait]
impl ModuleExecutor for InputPromptExecutor {
    fn module_type(&self) -> &'static str {
        "input_prompt"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let variable = match required_string(config, ctx, "variableName") {
            Ok(variable) => variable,
            Err(e) => return e.into(),
        };
        let title = match resolved_string(config, ctx, "title", "Input") {
            Ok(title) => title,
            Err(e) => return e.into(),
        };
        let message = match resolved_string(config, ctx, "message", "") {
            Ok(message) => message,
            Err(e) => return e.into(),
        };
        let default_value = match resolved_string(config, ctx, "defaultValue", "") {
            Ok(default_value) => default_value,
            Err(e) => return e.into(),
        };
        let timeout = match resolved_i64(config, ctx, "timeout", 300) {
            Ok(secs) => Duration::from_secs(secs.max(1) as u64),
            Err(e) => return e.into(),
        };

        let payload = json!({
            "variableName": variable,
            "title": title,
            "message": message,
            "defaultValue": default_value,
        });
        let reply = match rendezvous_roundtrip(ctx, RendezvousCategory::InputPrompt, payload, timeout).await {
            Ok(reply) => reply,
            Err(failure) => return failure,
        };

        let value = match reply.get("value") {
            Some(Value::Null) | None => json!(default_value),
            Some(value) => value.clone(),
        };
        ctx.set_variable(&variable, value.clone());
        ModuleResult::ok(format!("input received for {variable}")).with_data(value)
    }
}

/// Evaluate a script on the observer side and optionally store its result.
pub struct ScriptEvalExecutor;

#[async_trait]
impl ModuleExecutor for ScriptEvalExecutor {
    fn module_type(&self) -> &'static str {
        "script_eval"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let code = match required_string(config, ctx, "code") {
            Ok(code) => code,
            Err(e) => return e.into(),
        };
        let result_variable = match resolved_string(config, ctx, "resultVariable", "") {
            Ok(result_variable) => result_variable,
            Err(e) => return e.into(),
        };
        let timeout = match resolved_i64(config, ctx, "timeout", 30) {
            Ok(secs) => Duration::from_secs(secs.max(1) as u64),
            Err(e) => return e.into(),
        };

        let payload = json!({
            "code": code,
            "variables": ctx.variables().snapshot(),
        });
        let reply = match rendezvous_roundtrip(ctx, RendezvousCategory::ScriptEval, payload, timeout).await {
            Ok(reply) => reply,
            Err(failure) => return failure,
        };

        if !reply.get("success").and_then(Value::as_bool).unwrap_or(false) {
            let error = reply
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("script evaluation failed");
            return ModuleResult::fail(error.to_string());
        }

        let result = reply.get("result").cloned().unwrap_or(Value::Null);
        if !result_variable.is_empty() {
            ctx.set_variable(&result_variable, result.clone());
        }
        ModuleResult::ok("script evaluated").with_data(result)
    }
}

/// Play audio or video on the observer side.
pub struct PlayMediaExecutor;

#[async_trait]
impl ModuleExecutor for PlayMediaExecutor {
    fn module_type(&self) -> &'static str {
        "play_media"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let url = match required_string(config, ctx, "mediaUrl") {
            Ok(url) => url,
            Err(e) => return e.into(),
        };
        let media_type = match resolved_string(config, ctx, "mediaType", "audio") {
            Ok(media_type) => media_type,
            Err(e) => return e.into(),
        };
        let wait_for_end = match resolved_bool(config, ctx, "waitForEnd", true) {
            Ok(wait_for_end) => wait_for_end,
            Err(e) => return e.into(),
        };
        let timeout = match resolved_i64(config, ctx, "timeout", 600) {
            Ok(secs) => Duration::from_secs(secs.max(1) as u64),
            Err(e) => return e.into(),
        };

        let payload = json!({
            "mediaUrl": url,
            "mediaType": media_type,
            "waitForEnd": wait_for_end,
        });
        let reply = match rendezvous_roundtrip(ctx, RendezvousCategory::MediaPlayback, payload, timeout).await {
            Ok(reply) => reply,
            Err(failure) => return failure,
        };

        if reply.get("success").and_then(Value::as_bool).unwrap_or(false) {
            ModuleResult::ok(format!("played {media_type}: {url}"))
        } else {
            let error = reply.get("error").and_then(Value::as_str).unwrap_or("playback failed");
            ModuleResult::fail(error.to_string())
        }
    }
}

/// Show an image to the operator.
pub struct ViewImageExecutor;

#[async_trait]
impl ModuleExecutor for ViewImageExecutor {
    fn module_type(&self) -> &'static str {
        "view_image"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let url = match required_string(config, ctx, "imageUrl") {
            Ok(url) => url,
            Err(e) => return e.into(),
        };
        let auto_close = match resolved_bool(config, ctx, "autoClose", false) {
            Ok(auto_close) => auto_close,
            Err(e) => return e.into(),
        };
        let display_time = match resolved_i64(config, ctx, "displayTime", 5) {
            Ok(display_time) => display_time,
            Err(e) => return e.into(),
        };
        let timeout = match resolved_i64(config, ctx, "timeout", 300) {
            Ok(secs) => Duration::from_secs(secs.max(1) as u64),
            Err(e) => return e.into(),
        };

        let payload = json!({
            "imageUrl": url,
            "autoClose": auto_close,
            "displayTime": display_time,
        });
        match rendezvous_roundtrip(ctx, RendezvousCategory::ImageView, payload, timeout).await {
            Ok(_) => ModuleResult::ok(format!("image viewed: {url}")),
            Err(failure) => failure,
        }
    }
}

/// Speak text through the observer's speech synthesis.
pub struct SpeakTextExecutor;

#[async_trait]
impl ModuleExecutor for SpeakTextExecutor {
    fn module_type(&self) -> &'static str {
        "speak_text"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let text = match required_string(config, ctx, "text") {
            Ok(text) => text,
            Err(e) => return e.into(),
        };
        let lang = match resolved_string(config, ctx, "lang", "en-US") {
            Ok(lang) => lang,
            Err(e) => return e.into(),
        };
        let rate = match resolved_f64(config, ctx, "rate", 1.0) {
            Ok(rate) => rate,
            Err(e) => return e.into(),
        };
        let timeout = match resolved_i64(config, ctx, "timeout", 60) {
            Ok(secs) => Duration::from_secs(secs.max(1) as u64),
            Err(e) => return e.into(),
        };

        let payload = json!({ "text": text, "lang": lang, "rate": rate });
        let reply = match rendezvous_roundtrip(ctx, RendezvousCategory::TextToSpeech, payload, timeout).await {
            Ok(reply) => reply,
            Err(failure) => return failure,
        };

        if reply.get("success").and_then(Value::as_bool).unwrap_or(false) {
            ModuleResult::ok("speech finished")
        } else {
            ModuleResult::fail("speech synthesis failed")
        }
    }
}
