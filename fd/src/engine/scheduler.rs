//! Scheduler - walks the node graph
//!
//! One scheduler drives one run over one context. Each step dispatches the
//! node's executor, stamps the wall-clock duration onto the result, emits
//! `node:start`/`node:end` (always paired), and picks the next node
//! from the result's branch label and the edge topology. Loop headers and
//! subflow calls are control modules handled natively; everything else goes
//! through the executor registry.

use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, warn};
use valuestore::LogLevel;

use crate::context::ExecutionContext;
use crate::error::EngineError;
use crate::events::{EventEmitter, RunStatus};
use crate::executor::config::resolved_string;
use crate::executor::{ExecutorRegistry, ModuleResult};
use crate::workflow::{Node, Workflow};

use super::loops::{LOOP_BODY_LABEL, LoopErrorPolicy, advance_frame, init_frame, is_loop_header};

/// Subflow call depth cap; a self-calling subflow fails instead of spinning.
const MAX_SUBFLOW_DEPTH: usize = 64;

/// Final accounting for one run, mirrored on the `run:end` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub status: RunStatus,
    pub executed_count: u64,
    pub failed_count: u64,
    pub error: Option<String>,
}

/// Saved return address for an in-flight subflow call. The call node's
/// `node:end` is withheld until the frame pops so it can mirror the
/// subflow's terminal status.
struct SubflowFrame {
    call_node_id: String,
    return_to: Option<String>,
    started: Instant,
    /// Loop stack depth when the subflow was entered; loops opened inside
    /// the subflow resolve before the frame pops.
    loop_depth: usize,
}

pub struct Scheduler {
    workflow: Arc<Workflow>,
    registry: Arc<ExecutorRegistry>,
}

impl Scheduler {
    pub fn new(workflow: Arc<Workflow>, registry: Arc<ExecutorRegistry>) -> Self {
        Self { workflow, registry }
    }

    /// Execute the workflow to completion, failure, or stop.
    /// `run:end` is always emitted, whatever the outcome.
    pub async fn run(&self, ctx: &mut ExecutionContext) -> RunSummary {
        let emitter = ctx.emitter().cloned();
        let mut subflows: Vec<SubflowFrame> = Vec::new();
        let mut executed = 0u64;
        let mut failed = 0u64;
        let mut status = RunStatus::Completed;
        let mut run_error: Option<String> = None;

        let mut cursor: Option<String> = match self.workflow.start_node() {
            Some(start) => {
                debug!(workflow_id = %self.workflow.id, start = %start.id, "Scheduler::run: starting");
                self.workflow.next_node(&start.id, None).map(str::to_string)
            }
            None => {
                warn!(workflow_id = %self.workflow.id, "Scheduler::run: no start node");
                status = RunStatus::Failed;
                run_error = Some("no start node".to_string());
                None
            }
        };

        while let Some(node_id) = cursor.take() {
            if ctx.cancel_flag().is_signaled() {
                debug!(%node_id, "Scheduler::run: cancellation observed, stopping");
                status = RunStatus::Stopped;
                break;
            }

            let Some(node) = self.workflow.node(&node_id) else {
                status = RunStatus::Failed;
                run_error = Some(format!("edge points to unknown node: {node_id}"));
                break;
            };

            // --- Loop headers ---
            if is_loop_header(&node.module_type) {
                executed += 1;
                if let Some(emitter) = &emitter {
                    emitter.node_start(&node.id, &node.module_type, &config_preview(node));
                }
                let started = Instant::now();

                match self.step_loop_header(node, ctx) {
                    Ok((message, branch)) => {
                        let duration = started.elapsed().as_millis() as u64;
                        ctx.add_log(LogLevel::Info, &message, Some(node.id.clone()), Some(duration));
                        if let Some(emitter) = &emitter {
                            emitter.node_end(&node.id, true, &message, duration, None, None);
                        }
                        cursor = match self.workflow.next_node(&node.id, branch) {
                            Some(next) => Some(next.to_string()),
                            None => self.resolve_dead_end(ctx, &mut subflows, &emitter),
                        };
                    }
                    Err(e) => {
                        failed += 1;
                        let duration = started.elapsed().as_millis() as u64;
                        let error = e.to_string();
                        ctx.add_log(LogLevel::Error, &error, Some(node.id.clone()), Some(duration));
                        if let Some(emitter) = &emitter {
                            emitter.node_end(&node.id, false, &error, duration, Some(error.clone()), None);
                        }
                        status = RunStatus::Failed;
                        run_error = Some(error);
                        break;
                    }
                }
                continue;
            }

            // --- Subflow calls ---
            if node.module_type == "subflow" {
                executed += 1;
                if let Some(emitter) = &emitter {
                    emitter.node_start(&node.id, &node.module_type, &config_preview(node));
                }
                let started = Instant::now();

                match self.enter_subflow(node, ctx, subflows.len()) {
                    Ok(entry) => {
                        let return_to = self.workflow.next_node(&node.id, None).map(str::to_string);
                        subflows.push(SubflowFrame {
                            call_node_id: node.id.clone(),
                            return_to,
                            started,
                            loop_depth: ctx.loop_stack.len(),
                        });
                        cursor = Some(entry);
                    }
                    Err(e) => {
                        failed += 1;
                        let duration = started.elapsed().as_millis() as u64;
                        let error = e.to_string();
                        ctx.add_log(LogLevel::Error, &error, Some(node.id.clone()), Some(duration));
                        if let Some(emitter) = &emitter {
                            emitter.node_end(&node.id, false, &error, duration, Some(error.clone()), None);
                        }
                        status = RunStatus::Failed;
                        run_error = Some(error);
                        break;
                    }
                }
                continue;
            }

            // --- Ordinary nodes ---
            executed += 1;
            if let Some(emitter) = &emitter {
                emitter.node_start(&node.id, &node.module_type, &config_preview(node));
            }
            let started = Instant::now();

            let mut result = match self.registry.get(&node.module_type) {
                Some(executor) => {
                    // Executor aborts become synthetic failure results.
                    match std::panic::AssertUnwindSafe(executor.execute(&node.config, ctx))
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result,
                        Err(panic) => ModuleResult::fail(format!("executor aborted: {}", panic_message(&panic))),
                    }
                }
                None => ModuleResult::fail(format!("unknown module type: {}", node.module_type)),
            };
            // Duration is dispatch-to-return wall clock, set here.
            result.duration_ms = started.elapsed().as_millis() as u64;

            let log_message = if result.success {
                result.message.clone()
            } else {
                result.error.clone().unwrap_or_else(|| result.message.clone())
            };
            let level = result
                .log_level
                .unwrap_or(if result.success { LogLevel::Info } else { LogLevel::Error });
            ctx.add_log(level, &log_message, Some(node.id.clone()), Some(result.duration_ms));

            if let Some(emitter) = &emitter {
                emitter.node_end(
                    &node.id,
                    result.success,
                    &result.message,
                    result.duration_ms,
                    result.error.clone(),
                    result.log_level,
                );
            }

            if !result.success {
                failed += 1;

                if ctx.cancel_flag().is_signaled() {
                    status = RunStatus::Stopped;
                    break;
                }

                // Error-tolerant loops advance instead of failing the run.
                let tolerant_header = ctx
                    .loop_stack
                    .last()
                    .filter(|frame| frame.on_error == LoopErrorPolicy::Continue)
                    .map(|frame| frame.header_id.clone());
                if let Some(header_id) = tolerant_header {
                    warn!(
                        node_id = %node.id,
                        %header_id,
                        "node failed inside error-tolerant loop, advancing"
                    );
                    ctx.should_continue = true;
                    cursor = Some(header_id);
                    continue;
                }

                status = RunStatus::Failed;
                run_error = Some(result.error.unwrap_or(log_message));
                break;
            }

            // Break/continue cut straight back to the innermost header.
            if (ctx.should_break || ctx.should_continue) && !ctx.loop_stack.is_empty() {
                cursor = ctx.loop_stack.last().map(|frame| frame.header_id.clone());
                continue;
            }

            cursor = match self.workflow.next_node(&node.id, result.branch.as_deref()) {
                Some(next) => Some(next.to_string()),
                None => self.resolve_dead_end(ctx, &mut subflows, &emitter),
            };
        }

        // A run that ended inside subflows still owes node:end for each
        // open call, mirroring the terminal status.
        while let Some(frame) = subflows.pop() {
            if let Some(emitter) = &emitter {
                emitter.node_end(
                    &frame.call_node_id,
                    false,
                    "subflow did not complete",
                    frame.started.elapsed().as_millis() as u64,
                    run_error.clone(),
                    None,
                );
            }
        }

        if let Some(emitter) = &emitter {
            emitter.run_end(status, executed, failed, run_error.clone());
        }
        debug!(?status, executed, failed, "Scheduler::run: finished");

        RunSummary {
            status,
            executed_count: executed,
            failed_count: failed,
            error: run_error,
        }
    }

    /// Initialize or advance the loop frame for a header node. Returns the
    /// log message and the branch to take (`loop` enters the body, `None`
    /// exits through the default edge).
    fn step_loop_header(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<(String, Option<&'static str>), EngineError> {
        let is_return = ctx.loop_stack.last().is_some_and(|frame| frame.header_id == node.id);

        let mut frame = if is_return {
            let frame = ctx.loop_stack.pop().expect("frame checked above");
            if ctx.should_break {
                ctx.should_break = false;
                ctx.should_continue = false;
                return Ok((format!("loop break after {} iterations", frame.iterations), None));
            }
            ctx.should_continue = false;
            frame
        } else {
            init_frame(node, ctx)?
        };

        match advance_frame(&mut frame, ctx)? {
            Some(bindings) => {
                let message = format!("iteration {}", frame.iterations);
                ctx.loop_stack.push(frame);
                for (name, value) in bindings {
                    // Bookkeeping writes bypass the variable-update sink.
                    ctx.set_variable_internal(&name, value);
                }
                Ok((message, Some(LOOP_BODY_LABEL)))
            }
            None => Ok((format!("loop finished after {} iterations", frame.iterations), None)),
        }
    }

    /// Resolve a subflow call node to its entry node id.
    fn enter_subflow(&self, node: &Node, ctx: &ExecutionContext, depth: usize) -> Result<String, EngineError> {
        if depth >= MAX_SUBFLOW_DEPTH {
            return Err(EngineError::validation("subflow call depth exceeded"));
        }
        let name = resolved_string(&node.config, ctx, "subflowName", "")?;
        let group_id = resolved_string(&node.config, ctx, "subflowGroupId", "")?;
        if name.is_empty() && group_id.is_empty() {
            return Err(EngineError::validation("no subflow selected"));
        }

        let resolved = self
            .workflow
            .resolve_group(&name, &group_id)
            .ok_or_else(|| EngineError::validation(format!("subflow not found: {}", if name.is_empty() { &group_id } else { &name })))?;
        let entry = self
            .workflow
            .group_entry(&resolved)
            .ok_or_else(|| EngineError::validation(format!("subflow group is empty: {resolved}")))?;
        debug!(call = %node.id, group = %resolved, entry = %entry.id, "Scheduler::enter_subflow");
        Ok(entry.id.clone())
    }

    /// A node with no outgoing edge ends the innermost active construct:
    /// loop bodies return to their header, subflows pop back to the saved
    /// return address, and the outermost dead end is the end of the graph.
    fn resolve_dead_end(
        &self,
        ctx: &mut ExecutionContext,
        subflows: &mut Vec<SubflowFrame>,
        emitter: &Option<EventEmitter>,
    ) -> Option<String> {
        loop {
            let loop_floor = subflows.last().map(|frame| frame.loop_depth).unwrap_or(0);
            if ctx.loop_stack.len() > loop_floor {
                return ctx.loop_stack.last().map(|frame| frame.header_id.clone());
            }

            let frame = subflows.pop()?;
            if let Some(emitter) = emitter {
                emitter.node_end(
                    &frame.call_node_id,
                    true,
                    "subflow completed",
                    frame.started.elapsed().as_millis() as u64,
                    None,
                    None,
                );
            }
            if frame.return_to.is_some() {
                return frame.return_to;
            }
            // The call node itself dead-ends; resolve in the outer region.
        }
    }
}

/// Truncated config rendering for `node:start`.
fn config_preview(node: &Node) -> String {
    let rendered = serde_json::to_string(&node.config).unwrap_or_default();
    if rendered.chars().count() > 120 {
        let truncated: String = rendered.chars().take(120).collect();
        format!("{truncated}…")
    } else {
        rendered
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunServices;
    use crate::events::{EventBus, FlowEvent};
    use crate::workflow::Edge;
    use serde_json::{Map, Value, json};

    fn node(id: &str, module_type: &str, config: Value) -> Node {
        Node {
            id: id.into(),
            module_type: module_type.into(),
            config: config.as_object().cloned().unwrap_or_default(),
            name: None,
            group_id: None,
        }
    }

    fn edge(from: &str, to: &str, label: Option<&str>) -> Edge {
        Edge {
            from: from.into(),
            to: to.into(),
            label: label.map(String::from),
        }
    }

    fn scheduler(workflow: Workflow) -> Scheduler {
        Scheduler::new(Arc::new(workflow), Arc::new(ExecutorRegistry::standard()))
    }

    async fn run_collecting(workflow: Workflow) -> (RunSummary, Vec<FlowEvent>, ExecutionContext) {
        let bus = EventBus::new(1024);
        let mut rx = bus.subscribe();
        let mut ctx = ExecutionContext::new("run-1", RunServices::new()).with_emitter(bus.emitter_for("run-1"));
        let summary = scheduler(workflow).run(&mut ctx).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (summary, events, ctx)
    }

    fn count_type(events: &[FlowEvent], name: &str) -> usize {
        events.iter().filter(|e| e.event_type() == name).count()
    }

    #[tokio::test]
    async fn test_straight_line_run() {
        let workflow = Workflow {
            id: "w".into(),
            nodes: vec![
                node("n0", "start", json!({})),
                node("n1", "set_variable", json!({"variableName": "k", "variableValue": "7"})),
                node("n2", "print_log", json!({"logMessage": "k={k}"})),
            ],
            edges: vec![edge("n0", "n1", None), edge("n1", "n2", None)],
        };
        let (summary, events, _ctx) = run_collecting(workflow).await;

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.executed_count, 2);
        assert_eq!(summary.failed_count, 0);
        // The start node emits no events.
        assert_eq!(count_type(&events, "node:start"), 2);
        assert_eq!(count_type(&events, "node:end"), 2);
        assert_eq!(count_type(&events, "run:end"), 1);
    }

    #[tokio::test]
    async fn test_missing_start_node_fails() {
        let workflow = Workflow {
            id: "w".into(),
            nodes: vec![node("a", "print_log", json!({}))],
            edges: vec![],
        };
        let (summary, events, _ctx) = run_collecting(workflow).await;
        assert_eq!(summary.status, RunStatus::Failed);
        assert!(summary.error.unwrap().contains("no start node"));
        assert_eq!(count_type(&events, "run:end"), 1);
    }

    #[tokio::test]
    async fn test_unknown_module_fails_run() {
        let workflow = Workflow {
            id: "w".into(),
            nodes: vec![node("n0", "start", json!({})), node("n1", "not_a_module", json!({}))],
            edges: vec![edge("n0", "n1", None)],
        };
        let (summary, events, _ctx) = run_collecting(workflow).await;
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(count_type(&events, "node:start"), count_type(&events, "node:end"));
    }

    #[tokio::test]
    async fn test_branch_selection() {
        let make = |x: i64| Workflow {
            id: "w".into(),
            nodes: vec![
                node("n0", "start", json!({})),
                node("s", "set_variable", json!({"variableName": "x", "variableValue": x.to_string()})),
                node("c", "conditional", json!({"lhs": "{x}", "operator": "equals", "rhs": "5"})),
                node("yes", "print_log", json!({"logMessage": "yes"})),
                node("no", "print_log", json!({"logMessage": "no"})),
            ],
            edges: vec![
                edge("n0", "s", None),
                edge("s", "c", None),
                edge("c", "yes", Some("true")),
                edge("c", "no", Some("false")),
            ],
        };

        let (_, events, _) = run_collecting(make(5)).await;
        let messages: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                FlowEvent::NodeEnd { node_id, .. } => Some(node_id.clone()),
                _ => None,
            })
            .collect();
        assert!(messages.contains(&"yes".to_string()));
        assert!(!messages.contains(&"no".to_string()));

        let (_, events, _) = run_collecting(make(6)).await;
        let messages: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                FlowEvent::NodeEnd { node_id, .. } => Some(node_id.clone()),
                _ => None,
            })
            .collect();
        assert!(messages.contains(&"no".to_string()));
    }

    #[tokio::test]
    async fn test_loop_runs_body_n_times() {
        // loop -> body (print) -> back to loop via dead end
        let workflow = Workflow {
            id: "w".into(),
            nodes: vec![
                node("n0", "start", json!({})),
                node("loop", "loop_range", json!({"variableName": "i", "start": 1, "end": 4})),
                node("body", "print_log", json!({"logMessage": "i={i}"})),
                node("after", "print_log", json!({"logMessage": "done"})),
            ],
            edges: vec![
                edge("n0", "loop", None),
                edge("loop", "body", Some("loop")),
                edge("loop", "after", None),
            ],
        };
        let (summary, events, _ctx) = run_collecting(workflow).await;

        assert_eq!(summary.status, RunStatus::Completed);
        let body_ends = events
            .iter()
            .filter(|e| matches!(e, FlowEvent::NodeEnd { node_id, .. } if node_id == "body"))
            .count();
        assert_eq!(body_ends, 4);
        // Messages show late-bound loop variables.
        assert!(events.iter().any(
            |e| matches!(e, FlowEvent::NodeEnd { node_id, message, .. } if node_id == "body" && message == "i=4")
        ));
    }

    #[tokio::test]
    async fn test_loop_break_exits_early() {
        let workflow = Workflow {
            id: "w".into(),
            nodes: vec![
                node("n0", "start", json!({})),
                node("loop", "loop_range", json!({"variableName": "i", "start": 1, "end": 10})),
                node("body", "print_log", json!({"logMessage": "i={i}"})),
                node("check", "conditional", json!({"lhs": "{i}", "operator": "equals", "rhs": "3"})),
                node("brk", "break_loop", json!({})),
                node("after", "print_log", json!({"logMessage": "out"})),
            ],
            edges: vec![
                edge("n0", "loop", None),
                edge("loop", "body", Some("loop")),
                edge("body", "check", None),
                edge("check", "brk", Some("true")),
                edge("loop", "after", None),
            ],
        };
        let (summary, events, _ctx) = run_collecting(workflow).await;

        assert_eq!(summary.status, RunStatus::Completed);
        let body_ends = events
            .iter()
            .filter(|e| matches!(e, FlowEvent::NodeEnd { node_id, .. } if node_id == "body"))
            .count();
        assert_eq!(body_ends, 3);
        assert!(events.iter().any(
            |e| matches!(e, FlowEvent::NodeEnd { node_id, message, .. } if node_id == "after" && message == "out")
        ));
    }

    #[tokio::test]
    async fn test_empty_list_loop_runs_zero_body_nodes() {
        let workflow = Workflow {
            id: "w".into(),
            nodes: vec![
                node("n0", "start", json!({})),
                node("loop", "loop_list", json!({"variableName": "item", "list": []})),
                node("body", "print_log", json!({"logMessage": "never"})),
            ],
            edges: vec![edge("n0", "loop", None), edge("loop", "body", Some("loop"))],
        };
        let (summary, events, _ctx) = run_collecting(workflow).await;

        assert_eq!(summary.status, RunStatus::Completed);
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, FlowEvent::NodeEnd { node_id, .. } if node_id == "body"))
        );
    }

    #[tokio::test]
    async fn test_error_tolerant_loop_continues() {
        // Body always fails; with onError=continue the loop still finishes.
        let workflow = Workflow {
            id: "w".into(),
            nodes: vec![
                node("n0", "start", json!({})),
                node(
                    "loop",
                    "loop_range",
                    json!({"variableName": "i", "start": 1, "end": 3, "onError": "continue"}),
                ),
                node("body", "export_logs", json!({})), // missing filePath -> validation failure
                node("after", "print_log", json!({"logMessage": "survived"})),
            ],
            edges: vec![
                edge("n0", "loop", None),
                edge("loop", "body", Some("loop")),
                edge("loop", "after", None),
            ],
        };
        let (summary, _events, _ctx) = run_collecting(workflow).await;

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.failed_count, 3);
    }

    #[tokio::test]
    async fn test_loop_body_failure_stops_by_default() {
        let workflow = Workflow {
            id: "w".into(),
            nodes: vec![
                node("n0", "start", json!({})),
                node("loop", "loop_range", json!({"variableName": "i", "start": 1, "end": 3})),
                node("body", "export_logs", json!({})),
            ],
            edges: vec![edge("n0", "loop", None), edge("loop", "body", Some("loop"))],
        };
        let (summary, _events, _ctx) = run_collecting(workflow).await;
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.failed_count, 1);
    }

    #[tokio::test]
    async fn test_subflow_by_name() {
        let mut sub_a = node("sub-a", "set_variable", json!({"variableName": "inner", "variableValue": "1"}));
        sub_a.group_id = Some("g-upload".into());
        sub_a.name = Some("upload".into());
        let mut sub_b = node("sub-b", "print_log", json!({"logMessage": "uploading"}));
        sub_b.group_id = Some("g-upload".into());

        let workflow = Workflow {
            id: "w".into(),
            nodes: vec![
                node("n0", "start", json!({})),
                node("call", "subflow", json!({"subflowName": "upload"})),
                node("after", "print_log", json!({"logMessage": "back"})),
                sub_a,
                sub_b,
            ],
            edges: vec![
                edge("n0", "call", None),
                edge("call", "after", None),
                edge("sub-a", "sub-b", None),
            ],
        };
        let (summary, events, _ctx) = run_collecting(workflow).await;

        assert_eq!(summary.status, RunStatus::Completed);
        // Subflow nodes appear between the call's start and its end.
        let sequence: Vec<(String, String)> = events
            .iter()
            .filter_map(|e| match e {
                FlowEvent::NodeStart { node_id, .. } => Some(("start".into(), node_id.clone())),
                FlowEvent::NodeEnd { node_id, .. } => Some(("end".into(), node_id.clone())),
                _ => None,
            })
            .collect();
        let call_start = sequence.iter().position(|(k, n)| k == "start" && n == "call").unwrap();
        let call_end = sequence.iter().position(|(k, n)| k == "end" && n == "call").unwrap();
        let sub_end = sequence.iter().position(|(k, n)| k == "end" && n == "sub-b").unwrap();
        assert!(call_start < sub_end && sub_end < call_end);
        // The caller resumes after the subflow.
        assert!(sequence.iter().any(|(k, n)| k == "end" && n == "after"));
        assert_eq!(count_type(&events, "node:start"), count_type(&events, "node:end"));
    }

    #[tokio::test]
    async fn test_subflow_not_found_fails() {
        let workflow = Workflow {
            id: "w".into(),
            nodes: vec![
                node("n0", "start", json!({})),
                node("call", "subflow", json!({"subflowName": "ghost"})),
            ],
            edges: vec![edge("n0", "call", None)],
        };
        let (summary, events, _ctx) = run_collecting(workflow).await;
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(count_type(&events, "node:start"), count_type(&events, "node:end"));
    }

    #[tokio::test]
    async fn test_failure_inside_subflow_mirrors_on_call() {
        let mut sub = node("sub-x", "export_logs", json!({}));
        sub.group_id = Some("g".into());
        sub.name = Some("broken".into());

        let workflow = Workflow {
            id: "w".into(),
            nodes: vec![
                node("n0", "start", json!({})),
                node("call", "subflow", json!({"subflowName": "broken"})),
                sub,
            ],
            edges: vec![edge("n0", "call", None)],
        };
        let (summary, events, _ctx) = run_collecting(workflow).await;

        assert_eq!(summary.status, RunStatus::Failed);
        let call_end = events.iter().find_map(|e| match e {
            FlowEvent::NodeEnd { node_id, success, .. } if node_id == "call" => Some(*success),
            _ => None,
        });
        assert_eq!(call_end, Some(false));
        assert_eq!(count_type(&events, "node:start"), count_type(&events, "node:end"));
    }

    #[tokio::test]
    async fn test_cancellation_before_step() {
        let workflow = Workflow {
            id: "w".into(),
            nodes: vec![
                node("n0", "start", json!({})),
                node("n1", "print_log", json!({"logMessage": "never"})),
            ],
            edges: vec![edge("n0", "n1", None)],
        };
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut ctx = ExecutionContext::new("run-1", RunServices::new()).with_emitter(bus.emitter_for("run-1"));
        ctx.cancel_flag().signal();

        let summary = scheduler(workflow).run(&mut ctx).await;
        assert_eq!(summary.status, RunStatus::Stopped);
        assert_eq!(summary.executed_count, 0);

        let mut saw_run_end = false;
        while let Ok(event) = rx.try_recv() {
            if let FlowEvent::RunEnd { status, .. } = event {
                saw_run_end = true;
                assert_eq!(status, RunStatus::Stopped);
            }
        }
        assert!(saw_run_end);
    }

    #[tokio::test]
    async fn test_node_duration_is_stamped() {
        let workflow = Workflow {
            id: "w".into(),
            nodes: vec![
                node("n0", "start", json!({})),
                node("n1", "wait", json!({"duration": 60})),
            ],
            edges: vec![edge("n0", "n1", None)],
        };
        let (_, events, ctx) = run_collecting(workflow).await;

        let duration = events
            .iter()
            .find_map(|e| match e {
                FlowEvent::NodeEnd { node_id, duration_ms, .. } if node_id == "n1" => Some(*duration_ms),
                _ => None,
            })
            .unwrap();
        assert!(duration >= 60);
        // The log entry carries the same duration as the node:end event.
        assert_eq!(ctx.logs().last().unwrap().duration_ms, Some(duration));
    }

    #[test]
    fn test_config_preview_truncates() {
        let mut config = Map::new();
        config.insert("k".into(), json!("x".repeat(500)));
        let node = Node {
            id: "n".into(),
            module_type: "print_log".into(),
            config,
            name: None,
            group_id: None,
        };
        assert!(config_preview(&node).chars().count() <= 121);
    }
}
