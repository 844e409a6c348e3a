//! Module executors - the strategy contract each module type implements
//!
//! Executors receive the node's raw config (unresolved, so loop bodies see
//! late-bound values) and the run's execution context, and return a
//! [`ModuleResult`]. They never panic on ordinary input problems; internal
//! errors become `success=false` results which the scheduler records on the
//! node.

pub mod builtin;
pub mod compare;
pub mod config;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;
use valuestore::LogLevel;

use crate::context::ExecutionContext;
use crate::error::EngineError;

/// Node configuration as handed to executors.
pub type ModuleConfig = Map<String, Value>;

/// Result of one module execution.
#[derive(Debug, Clone)]
pub struct ModuleResult {
    pub success: bool,
    /// Human-readable summary for the log stream.
    pub message: String,
    /// Executor-defined payload; may be recorded in a caller-named variable.
    pub data: Value,
    /// Set iff `success` is false, or for recoverable partial failures.
    pub error: Option<String>,
    /// Steers the scheduler's edge selection (`"true"`/`"false"`).
    pub branch: Option<String>,
    /// Wall-clock execution time; stamped by the scheduler, not executors.
    pub duration_ms: u64,
    /// Override for the log-stream entry level (print-log module).
    pub log_level: Option<LogLevel>,
}

impl ModuleResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Value::Null,
            error: None,
            branch: None,
            duration_ms: 0,
            log_level: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: error.clone(),
            data: Value::Null,
            error: Some(error),
            branch: None,
            duration_ms: 0,
            log_level: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }
}

impl From<EngineError> for ModuleResult {
    fn from(e: EngineError) -> Self {
        Self::fail(e.to_string())
    }
}

/// The contract every module type implements.
#[async_trait]
pub trait ModuleExecutor: Send + Sync {
    /// Registry token this executor handles.
    fn module_type(&self) -> &'static str;

    /// Execute the module. Config fields are resolved by the executor via
    /// the context's resolver; suspension points must check cancellation.
    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult;
}

/// Maps module-type tokens to executor instances. Populated at startup and
/// immutable afterwards, so it is shared without locking.
pub struct ExecutorRegistry {
    executors: HashMap<&'static str, Box<dyn ModuleExecutor>>,
}

impl ExecutorRegistry {
    /// Empty registry (tests).
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Registry with every built-in executor.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for executor in builtin::all() {
            registry.register(executor);
        }
        registry
    }

    pub fn register(&mut self, executor: Box<dyn ModuleExecutor>) {
        debug!(module_type = executor.module_type(), "ExecutorRegistry::register");
        self.executors.insert(executor.module_type(), executor);
    }

    pub fn get(&self, module_type: &str) -> Option<&dyn ModuleExecutor> {
        self.executors.get(module_type).map(Box::as_ref)
    }

    pub fn has(&self, module_type: &str) -> bool {
        self.executors.contains_key(module_type)
    }

    pub fn module_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.executors.keys().copied().collect();
        types.sort_unstable();
        types
    }
}
