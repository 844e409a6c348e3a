//! Control-flow modules - conditionals and loop break/continue

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::context::ExecutionContext;
use crate::executor::compare::compare_values;
use crate::executor::config::resolved_string;
use crate::executor::{ModuleConfig, ModuleExecutor, ModuleResult};

/// Compare two operands and steer the scheduler via `branch`.
/// Succeeds whatever the comparison outcome; only malformed comparators or
/// regexes fail the node.
pub struct ConditionalExecutor;

#[async_trait]
impl ModuleExecutor for ConditionalExecutor {
    fn module_type(&self) -> &'static str {
        "conditional"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let op = match resolved_string(config, ctx, "operator", "equals") {
            Ok(op) => op,
            Err(e) => return e.into(),
        };
        let lhs = match ctx.resolve(config.get("lhs").unwrap_or(&Value::Null)) {
            Ok(lhs) => lhs,
            Err(e) => return e.into(),
        };
        let rhs = match ctx.resolve(config.get("rhs").unwrap_or(&Value::Null)) {
            Ok(rhs) => rhs,
            Err(e) => return e.into(),
        };

        let outcome = match compare_values(&lhs, &op, &rhs) {
            Ok(outcome) => outcome,
            Err(e) => return e.into(),
        };

        let branch = if outcome { "true" } else { "false" };
        ModuleResult::ok(format!("{lhs} {op} {rhs} -> {branch}"))
            .with_data(json!({ "result": outcome }))
            .with_branch(branch)
    }
}

/// Set the one-shot break flag; the innermost loop exits immediately.
pub struct BreakLoopExecutor;

#[async_trait]
impl ModuleExecutor for BreakLoopExecutor {
    fn module_type(&self) -> &'static str {
        "break_loop"
    }

    async fn execute(&self, _config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        if ctx.loop_stack.is_empty() {
            return ModuleResult::fail("break outside of a loop");
        }
        ctx.should_break = true;
        ModuleResult::ok("break requested")
    }
}

/// Set the one-shot continue flag; the rest of the iteration is skipped.
pub struct ContinueLoopExecutor;

#[async_trait]
impl ModuleExecutor for ContinueLoopExecutor {
    fn module_type(&self) -> &'static str {
        "continue_loop"
    }

    async fn execute(&self, _config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        if ctx.loop_stack.is_empty() {
            return ModuleResult::fail("continue outside of a loop");
        }
        ctx.should_continue = true;
        ModuleResult::ok("continue requested")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunServices;
    use crate::engine::{LoopErrorPolicy, LoopFrame, LoopKind};
    use serde_json::Map;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("test", RunServices::new())
    }

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn push_frame(ctx: &mut ExecutionContext) {
        ctx.loop_stack.push(LoopFrame {
            header_id: "loop-1".into(),
            kind: LoopKind::Range {
                current: 0,
                end: 3,
                step: 1,
            },
            var_name: None,
            index_var: None,
            on_error: LoopErrorPolicy::Stop,
            iterations: 0,
        });
    }

    #[tokio::test]
    async fn test_conditional_true_branch() {
        let mut ctx = ctx();
        ctx.set_variable("x", json!(5));
        let result = ConditionalExecutor
            .execute(
                &config(json!({"lhs": "{x}", "operator": "equals", "rhs": "5"})),
                &mut ctx,
            )
            .await;
        assert!(result.success);
        assert_eq!(result.branch.as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_conditional_false_branch_still_succeeds() {
        let mut ctx = ctx();
        ctx.set_variable("x", json!(6));
        let result = ConditionalExecutor
            .execute(
                &config(json!({"lhs": "{x}", "operator": "equals", "rhs": "5"})),
                &mut ctx,
            )
            .await;
        assert!(result.success);
        assert_eq!(result.branch.as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn test_conditional_missing_variable_compares_null() {
        let mut ctx = ctx();
        let result = ConditionalExecutor
            .execute(&config(json!({"lhs": "{ghost}", "operator": "not_exists"})), &mut ctx)
            .await;
        assert_eq!(result.branch.as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_conditional_bad_regex_fails() {
        let mut ctx = ctx();
        let result = ConditionalExecutor
            .execute(
                &config(json!({"lhs": "x", "operator": "matches_regex", "rhs": "[oops"})),
                &mut ctx,
            )
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_break_sets_flag_inside_loop() {
        let mut ctx = ctx();
        push_frame(&mut ctx);
        let result = BreakLoopExecutor.execute(&config(json!({})), &mut ctx).await;
        assert!(result.success);
        assert!(ctx.should_break);
    }

    #[tokio::test]
    async fn test_break_outside_loop_fails() {
        let mut ctx = ctx();
        let result = BreakLoopExecutor.execute(&config(json!({})), &mut ctx).await;
        assert!(!result.success);
        assert!(!ctx.should_break);
    }

    #[tokio::test]
    async fn test_continue_sets_flag_inside_loop() {
        let mut ctx = ctx();
        push_frame(&mut ctx);
        let result = ContinueLoopExecutor.execute(&config(json!({})), &mut ctx).await;
        assert!(result.success);
        assert!(ctx.should_continue);
    }
}
