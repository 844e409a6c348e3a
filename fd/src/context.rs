//! Execution context - one run's mutable state
//!
//! A context is created at run start and dropped after the scheduler
//! returns. It is never driven by two workers at once: the scheduler
//! holds it exclusively and lends it to the executing node. Concurrency
//! exists only at the boundaries, which the context reaches through shared
//! service handles (rendezvous registry, process supervisor, server
//! manager) and the telemetry emitter.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use valuestore::{DataTable, LogBuffer, LogEntry, LogLevel, Variables, resolve_value};

use crate::error::EngineError;
use crate::events::EventEmitter;
use crate::process::ProcessSupervisor;
use crate::rendezvous::RendezvousRegistry;
use crate::servers::ServerManager;

/// Opaque reference to a browser owned by the automation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserHandle(pub String);

/// Opaque reference to a browser context (profile/session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserContextHandle(pub String);

/// Opaque reference to a page or frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageHandle(pub String);

/// How an iframe was located when the workflow descended into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameLocatorKind {
    Name,
    Index,
    Selector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameLocator {
    pub kind: FrameLocatorKind,
    pub value: Value,
}

/// Frame-descent tracking. Invariant: `in_iframe` implies `main_page`
/// is set, so clicks inside an iframe never lose the page to return to.
#[derive(Debug, Clone, Default)]
pub struct IframeState {
    in_iframe: bool,
    main_page: Option<PageHandle>,
    current_frame: Option<PageHandle>,
    locator: Option<FrameLocator>,
}

impl IframeState {
    pub fn in_iframe(&self) -> bool {
        self.in_iframe
    }

    pub fn main_page(&self) -> Option<&PageHandle> {
        self.main_page.as_ref()
    }

    pub fn current_frame(&self) -> Option<&PageHandle> {
        self.current_frame.as_ref()
    }

    pub fn locator(&self) -> Option<&FrameLocator> {
        self.locator.as_ref()
    }
}

/// Monotonic cancellation flag. Once signaled it stays signaled; every
/// suspension point checks it on resumption.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_signaled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error out when cancellation was requested.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_signaled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Shared service handles threaded into every context.
///
/// Each service is a single well-scoped object owned by the bus and passed
/// by reference; there are no global singletons.
#[derive(Clone)]
pub struct RunServices {
    pub rendezvous: Arc<RendezvousRegistry>,
    pub processes: Arc<ProcessSupervisor>,
    pub servers: Arc<ServerManager>,
}

impl RunServices {
    pub fn new() -> Self {
        Self {
            rendezvous: Arc::new(RendezvousRegistry::new()),
            processes: Arc::new(ProcessSupervisor::new()),
            servers: Arc::new(ServerManager::new()),
        }
    }
}

impl Default for RunServices {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-run mutable state shared between module executors.
pub struct ExecutionContext {
    run_id: String,
    variables: Variables,
    data: DataTable,
    logs: LogBuffer,

    /// Stack of active loop frames, innermost last.
    pub loop_stack: Vec<crate::engine::LoopFrame>,
    /// One-shot flags set by loop bodies, cleared by the loop header.
    pub should_break: bool,
    pub should_continue: bool,

    pub headless: bool,
    pub browser_config: Option<Value>,
    pub user_data_dir: Option<std::path::PathBuf>,

    browser: Option<BrowserHandle>,
    browser_context: Option<BrowserContextHandle>,
    page: Option<PageHandle>,
    open_pages: Vec<PageHandle>,
    iframe: IframeState,

    emitter: Option<EventEmitter>,
    cancel: CancelFlag,
    services: RunServices,
}

impl ExecutionContext {
    pub fn new(run_id: impl Into<String>, services: RunServices) -> Self {
        let run_id = run_id.into();
        debug!(%run_id, "ExecutionContext::new");
        Self {
            run_id,
            variables: Variables::new(),
            data: DataTable::new(),
            logs: LogBuffer::new(),
            loop_stack: Vec::new(),
            should_break: false,
            should_continue: false,
            headless: false,
            browser_config: None,
            user_data_dir: None,
            browser: None,
            browser_context: None,
            page: None,
            open_pages: Vec::new(),
            iframe: IframeState::default(),
            emitter: None,
            cancel: CancelFlag::new(),
            services,
        }
    }

    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_browser_config(mut self, config: Option<Value>) -> Self {
        self.browser_config = config;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emitter(&self) -> Option<&EventEmitter> {
        self.emitter.as_ref()
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Bail out if cancellation was signaled. Called at every suspension
    /// point inside executors.
    pub fn check_cancelled(&self) -> Result<(), EngineError> {
        self.cancel.check()
    }

    // === Services ===

    pub fn rendezvous(&self) -> &Arc<RendezvousRegistry> {
        &self.services.rendezvous
    }

    pub fn processes(&self) -> &Arc<ProcessSupervisor> {
        &self.services.processes
    }

    pub fn servers(&self) -> &Arc<ServerManager> {
        &self.services.servers
    }

    // === Variables ===

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn get_variable_or(&self, name: &str, default: Value) -> Value {
        self.variables.get_or(name, default)
    }

    /// Set a variable on behalf of an executor; fires `variable:update`.
    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.variables.set(name, value.clone());
        if let Some(emitter) = &self.emitter {
            emitter.variable_update(name, value);
        }
    }

    /// Context-internal write (loop indices and similar bookkeeping).
    /// Does not emit `variable:update`.
    pub fn set_variable_internal(&mut self, name: &str, value: Value) {
        self.variables.set(name, value);
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Resolve variable references inside a config value. Referenced
    /// values are deep-copied into the result, so later variable writes
    /// cannot alias into an already-computed expression.
    pub fn resolve(&self, value: &Value) -> Result<Value, EngineError> {
        Ok(resolve_value(value, &self.variables)?)
    }

    /// Resolve to a display string; `Null` becomes the empty string.
    pub fn resolve_to_string(&self, value: &Value) -> Result<String, EngineError> {
        Ok(match self.resolve(value)? {
            Value::Null => String::new(),
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    // === Data rows ===

    pub fn add_data_value(&mut self, column: &str, value: Value) {
        self.data.add_value(column, value);
    }

    pub fn commit_row(&mut self) {
        self.data.commit_row();
    }

    pub fn data(&self) -> &DataTable {
        &self.data
    }

    /// All collected rows including a partially-filled working row.
    pub fn collected_data(&self) -> Vec<serde_json::Map<String, Value>> {
        self.data.collected()
    }

    // === Logs & progress ===

    /// Append to the run's log buffer and mirror onto the telemetry stream.
    pub fn add_log(&mut self, level: LogLevel, message: &str, node_id: Option<String>, duration_ms: Option<u64>) {
        self.logs.add(level, message, node_id.clone(), duration_ms);
        if let Some(emitter) = &self.emitter {
            emitter.log(level, message, node_id, duration_ms);
        }
    }

    pub fn logs(&self) -> &[LogEntry] {
        self.logs.entries()
    }

    /// Free-form progress message for long-running operations.
    pub fn send_progress(&self, message: &str, node_id: Option<String>) {
        if let Some(emitter) = &self.emitter {
            emitter.progress(message, node_id);
        }
    }

    // === Browser / page tracking ===

    pub fn browser(&self) -> Option<&BrowserHandle> {
        self.browser.as_ref()
    }

    pub fn set_browser(&mut self, browser: BrowserHandle, context: BrowserContextHandle) {
        self.browser = Some(browser);
        self.browser_context = Some(context);
    }

    pub fn browser_context(&self) -> Option<&BrowserContextHandle> {
        self.browser_context.as_ref()
    }

    pub fn page(&self) -> Option<&PageHandle> {
        self.page.as_ref()
    }

    /// Record a newly opened page and make it current.
    pub fn open_page(&mut self, page: PageHandle) {
        self.open_pages.push(page.clone());
        self.page = Some(page);
    }

    /// Retarget to the most recently opened page (new-tab handling).
    ///
    /// Inside an iframe this refreshes the frame reference instead and never
    /// switches pages. Returns whether the current page changed.
    pub fn switch_to_latest_page(&mut self) -> bool {
        if self.iframe.in_iframe {
            return false;
        }
        let Some(latest) = self.open_pages.last().cloned() else {
            return false;
        };
        if self.page.as_ref() == Some(&latest) {
            return false;
        }
        self.page = Some(latest);
        true
    }

    pub fn iframe(&self) -> &IframeState {
        &self.iframe
    }

    /// The handle automation calls should target: the current frame when
    /// inside an iframe, otherwise the page.
    pub fn current_frame(&self) -> Option<&PageHandle> {
        if self.iframe.in_iframe {
            self.iframe.current_frame.as_ref().or(self.iframe.main_page.as_ref())
        } else {
            self.page.as_ref()
        }
    }

    /// Descend into an iframe. The current page becomes the main page to
    /// return to.
    pub fn enter_iframe(&mut self, frame: PageHandle, locator: FrameLocator) -> Result<(), EngineError> {
        let main_page = if self.iframe.in_iframe {
            // Nested iframe: keep the original main page.
            self.iframe.main_page.clone()
        } else {
            self.page.clone()
        };
        let Some(main_page) = main_page else {
            return Err(EngineError::validation("cannot enter iframe without an open page"));
        };
        self.iframe = IframeState {
            in_iframe: true,
            main_page: Some(main_page),
            current_frame: Some(frame),
            locator: Some(locator),
        };
        Ok(())
    }

    /// Return from the iframe to the main page.
    pub fn exit_iframe(&mut self) {
        if let Some(main_page) = self.iframe.main_page.take() {
            self.page = Some(main_page);
        }
        self.iframe = IframeState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ExecutionContext {
        ExecutionContext::new("test-run", RunServices::new())
    }

    #[test]
    fn test_variable_roundtrip_deep_equality() {
        let mut ctx = context();
        let value = json!({"rows": [1, 2, {"k": "v"}]});
        ctx.set_variable("data", value.clone());
        assert_eq!(ctx.get_variable("data"), Some(&value));
    }

    #[test]
    fn test_resolver_output_is_deep_copied() {
        let mut ctx = context();
        ctx.set_variable("list", json!([1, 2, 3]));
        let resolved = ctx.resolve(&json!("{list}")).unwrap();
        ctx.set_variable("list", json!(["changed"]));
        assert_eq!(resolved, json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_set_variable_fires_update_event() {
        use crate::events::EventBus;

        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let mut ctx = context().with_emitter(bus.emitter_for("r1"));

        ctx.set_variable("x", json!(5));
        ctx.set_variable_internal("loop_index", json!(0));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "variable:update");
        // Internal writes stay off the stream.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cancel_flag_is_monotonic() {
        let ctx = context();
        let flag = ctx.cancel_flag();
        assert!(ctx.check_cancelled().is_ok());
        flag.signal();
        assert!(ctx.check_cancelled().is_err());
        assert!(flag.is_signaled());
    }

    #[test]
    fn test_switch_to_latest_page() {
        let mut ctx = context();
        assert!(!ctx.switch_to_latest_page());

        ctx.open_page(PageHandle("p1".into()));
        ctx.open_page(PageHandle("p2".into()));
        // p2 is already current.
        assert!(!ctx.switch_to_latest_page());

        // A node navigated back to p1 manually; latest still wins.
        ctx.page = Some(PageHandle("p1".into()));
        assert!(ctx.switch_to_latest_page());
        assert_eq!(ctx.page().unwrap().0, "p2");
    }

    #[test]
    fn test_iframe_invariant_holds() {
        let mut ctx = context();
        let locator = FrameLocator {
            kind: FrameLocatorKind::Index,
            value: json!(0),
        };

        // No page open yet: descending is a validation error.
        assert!(ctx.enter_iframe(PageHandle("f1".into()), locator.clone()).is_err());

        ctx.open_page(PageHandle("main".into()));
        ctx.enter_iframe(PageHandle("f1".into()), locator.clone()).unwrap();
        assert!(ctx.iframe().in_iframe());
        assert_eq!(ctx.iframe().main_page().unwrap().0, "main");
        assert_eq!(ctx.current_frame().unwrap().0, "f1");

        // Nested descent keeps the original main page.
        ctx.enter_iframe(PageHandle("f2".into()), locator).unwrap();
        assert_eq!(ctx.iframe().main_page().unwrap().0, "main");

        // Inside an iframe the page never switches.
        ctx.open_page(PageHandle("tab2".into()));
        ctx.page = Some(PageHandle("main".into()));
        assert!(!ctx.switch_to_latest_page());

        ctx.exit_iframe();
        assert!(!ctx.iframe().in_iframe());
        assert_eq!(ctx.page().unwrap().0, "main");
    }

    #[test]
    fn test_add_log_records_entry() {
        let mut ctx = context();
        ctx.add_log(LogLevel::Info, "step done", Some("n1".into()), Some(42));
        assert_eq!(ctx.logs().len(), 1);
        assert_eq!(ctx.logs()[0].duration_ms, Some(42));
    }

    #[test]
    fn test_collected_data_includes_partial_row() {
        let mut ctx = context();
        ctx.add_data_value("x", json!("a"));
        ctx.add_data_value("x", json!("b"));
        let collected = ctx.collected_data();
        assert_eq!(collected.len(), 2);
    }
}
