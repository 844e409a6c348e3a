//! Loop frames - iteration state for the scheduler's loop protocol
//!
//! Loop headers are control modules recognized by the scheduler, not plain
//! executors: the header initializes or advances a frame on
//! `context.loop_stack` and steers traversal into the body (branch label
//! `loop`) or out through the default edge. While-loop operands are kept
//! unresolved in the frame and re-resolved every iteration so bodies can
//! steer their own condition.

use serde_json::{Value, json};
use tracing::debug;

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::executor::compare::compare_values;
use crate::executor::config::{resolved_i64, resolved_string};
use crate::workflow::Node;

/// Branch label that enters a loop body.
pub const LOOP_BODY_LABEL: &str = "loop";

/// Safety cap for while-loops without an explicit limit.
const DEFAULT_MAX_WHILE_ITERATIONS: i64 = 1000;

/// What a loop body failure does to the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopErrorPolicy {
    /// Fail the run (default).
    #[default]
    Stop,
    /// Log and advance to the next iteration.
    Continue,
}

/// Iteration state, per loop flavor.
#[derive(Debug, Clone)]
pub enum LoopKind {
    Range {
        current: i64,
        end: i64,
        step: i64,
    },
    List {
        items: Vec<Value>,
        index: usize,
    },
    While {
        lhs: Value,
        op: String,
        rhs: Value,
        max_iterations: i64,
    },
}

/// One active loop, innermost last on `context.loop_stack`.
#[derive(Debug, Clone)]
pub struct LoopFrame {
    pub header_id: String,
    pub kind: LoopKind,
    /// Loop variable receiving the current value (range value, list item,
    /// or while-iteration count).
    pub var_name: Option<String>,
    /// Optional second variable receiving the list index.
    pub index_var: Option<String>,
    pub on_error: LoopErrorPolicy,
    /// Body entries so far.
    pub iterations: u64,
}

/// Is this module type a loop header the scheduler drives?
pub fn is_loop_header(module_type: &str) -> bool {
    matches!(module_type, "loop_range" | "loop_list" | "loop_while")
}

fn error_policy(node: &Node, ctx: &ExecutionContext) -> Result<LoopErrorPolicy, EngineError> {
    let raw = resolved_string(&node.config, ctx, "onError", "stop")?;
    match raw.as_str() {
        "stop" | "" => Ok(LoopErrorPolicy::Stop),
        "continue" => Ok(LoopErrorPolicy::Continue),
        other => Err(EngineError::validation(format!("unknown onError policy: {other}"))),
    }
}

/// Build a fresh frame from a loop header node's config.
pub fn init_frame(node: &Node, ctx: &ExecutionContext) -> Result<LoopFrame, EngineError> {
    let on_error = error_policy(node, ctx)?;
    let var_name = {
        let name = resolved_string(&node.config, ctx, "variableName", "")?;
        if name.is_empty() { None } else { Some(name) }
    };

    let kind = match node.module_type.as_str() {
        "loop_range" => {
            let start = resolved_i64(&node.config, ctx, "start", 1)?;
            let end = resolved_i64(&node.config, ctx, "end", 1)?;
            let step = resolved_i64(&node.config, ctx, "step", 1)?;
            if step == 0 {
                return Err(EngineError::validation("loop step must not be zero"));
            }
            LoopKind::Range {
                current: start,
                end,
                step,
            }
        }
        "loop_list" => {
            let raw = node
                .config
                .get("list")
                .ok_or_else(|| EngineError::validation("loop_list requires a list"))?;
            let resolved = ctx.resolve(raw)?;
            let items = match resolved {
                Value::Array(items) => items,
                // A string that survived resolution may still be JSON text.
                Value::String(s) => serde_json::from_str::<Vec<Value>>(&s)
                    .map_err(|_| EngineError::validation(format!("loop_list value is not a list: {s}")))?,
                other => {
                    return Err(EngineError::validation(format!("loop_list value is not a list: {other}")));
                }
            };
            LoopKind::List { items, index: 0 }
        }
        "loop_while" => {
            let op = resolved_string(&node.config, ctx, "operator", "equals")?;
            let lhs = node.config.get("lhs").cloned().unwrap_or(Value::Null);
            let rhs = node.config.get("rhs").cloned().unwrap_or(Value::Null);
            let max_iterations = resolved_i64(&node.config, ctx, "maxIterations", DEFAULT_MAX_WHILE_ITERATIONS)?;
            LoopKind::While {
                lhs,
                op,
                rhs,
                max_iterations,
            }
        }
        other => return Err(EngineError::Fatal(format!("not a loop header: {other}"))),
    };

    let index_var = {
        let name = resolved_string(&node.config, ctx, "indexVariable", "")?;
        if name.is_empty() { None } else { Some(name) }
    };

    Ok(LoopFrame {
        header_id: node.id.clone(),
        kind,
        var_name,
        index_var,
        on_error,
        iterations: 0,
    })
}

/// Advance a frame one iteration.
///
/// Returns the variable bindings for the next body pass, or `None` when the
/// loop is exhausted. While-loop operands resolve against the current
/// context state on every call.
pub fn advance_frame(frame: &mut LoopFrame, ctx: &ExecutionContext) -> Result<Option<Vec<(String, Value)>>, EngineError> {
    let mut bindings = Vec::new();

    let entered = match &mut frame.kind {
        LoopKind::Range { current, end, step } => {
            let in_range = if *step > 0 { *current <= *end } else { *current >= *end };
            if in_range {
                if let Some(var) = &frame.var_name {
                    bindings.push((var.clone(), json!(*current)));
                }
                *current += *step;
                true
            } else {
                false
            }
        }
        LoopKind::List { items, index } => {
            if *index < items.len() {
                if let Some(var) = &frame.var_name {
                    bindings.push((var.clone(), items[*index].clone()));
                }
                if let Some(index_var) = &frame.index_var {
                    bindings.push((index_var.clone(), json!(*index)));
                }
                *index += 1;
                true
            } else {
                false
            }
        }
        LoopKind::While {
            lhs,
            op,
            rhs,
            max_iterations,
        } => {
            if frame.iterations as i64 >= *max_iterations {
                debug!(header_id = %frame.header_id, max = *max_iterations, "while loop hit iteration cap");
                false
            } else {
                let lhs = ctx.resolve(lhs)?;
                let rhs = ctx.resolve(rhs)?;
                if compare_values(&lhs, op, &rhs)? {
                    if let Some(var) = &frame.var_name {
                        bindings.push((var.clone(), json!(frame.iterations + 1)));
                    }
                    true
                } else {
                    false
                }
            }
        }
    };

    if entered {
        frame.iterations += 1;
        Ok(Some(bindings))
    } else {
        Ok(None)
    }
}
