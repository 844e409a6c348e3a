//! Entry bus - run lifecycle and control-command handling
//!
//! The bus owns the process-wide objects (executor registry, event bus,
//! rendezvous registry, process supervisor, server manager) and hands them
//! to each run's context by reference. It accepts control commands (run,
//! stop, set-current-workflow, rendezvous replies), spawns one scheduler
//! task per run, and serializes stop handling: cancel flag first, then
//! rendezvous release, then child-process termination.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, BROWSER_DATA_DIR};
use crate::context::{CancelFlag, ExecutionContext, RunServices};
use crate::engine::{RunSummary, Scheduler};
use crate::error::EngineError;
use crate::events::{EventBus, FlowEvent};
use crate::executor::ExecutorRegistry;
use crate::hotkey::HotkeyCommand;
use crate::workflow::Workflow;

struct ActiveRun {
    run_id: String,
    cancel: CancelFlag,
}

/// Central coordination point between observers, the hotkey bridge, and
/// scheduler tasks. Shared as `Arc<EngineBus>`.
pub struct EngineBus {
    config: AppConfig,
    event_bus: Arc<EventBus>,
    registry: Arc<ExecutorRegistry>,
    services: RunServices,
    /// Workflow id -> active run. A workflow runs at most once at a time;
    /// runs of different workflows coexist. Shared with scheduler tasks so
    /// each can deregister itself on completion.
    runs: Arc<Mutex<HashMap<String, ActiveRun>>>,
    /// Definitions seen by this bus, so hotkey `run` can replay them.
    workflows: Mutex<HashMap<String, Arc<Workflow>>>,
    /// Workflow bound to the hotkey bridge.
    current_workflow: Mutex<Option<String>>,
}

impl EngineBus {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            event_bus: Arc::new(EventBus::with_default_capacity()),
            registry: Arc::new(ExecutorRegistry::standard()),
            services: RunServices::new(),
            runs: Arc::new(Mutex::new(HashMap::new())),
            workflows: Mutex::new(HashMap::new()),
            current_workflow: Mutex::new(None),
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn services(&self) -> &RunServices {
        &self.services
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Start a run. Fails when the workflow is already running.
    /// Returns the run id and the scheduler task handle.
    pub fn start_run(
        &self,
        workflow: Workflow,
        headless: bool,
        browser_config: Option<Value>,
    ) -> Result<(String, JoinHandle<RunSummary>), EngineError> {
        for problem in workflow.validate() {
            warn!(workflow_id = %workflow.id, %problem, "workflow validation warning");
        }

        let workflow_id = workflow.id.clone();
        let run_id = format!("{}-{}", workflow_id, Uuid::new_v4());
        let cancel = CancelFlag::new();

        {
            let mut runs = self.runs.lock().expect("runs map poisoned");
            if runs.contains_key(&workflow_id) {
                return Err(EngineError::validation(format!(
                    "workflow {workflow_id} is already running"
                )));
            }
            runs.insert(
                workflow_id.clone(),
                ActiveRun {
                    run_id: run_id.clone(),
                    cancel: cancel.clone(),
                },
            );
        }

        let workflow = Arc::new(workflow);
        self.workflows
            .lock()
            .expect("workflow cache poisoned")
            .insert(workflow_id.clone(), workflow.clone());

        let persistent = browser_config
            .as_ref()
            .and_then(|c| c.get("persistent"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut ctx = ExecutionContext::new(run_id.clone(), self.services.clone())
            .with_emitter(self.event_bus.emitter_for(run_id.clone()))
            .with_headless(headless)
            .with_browser_config(browser_config)
            .with_cancel_flag(cancel);
        if persistent {
            ctx.user_data_dir = Some(std::path::PathBuf::from(BROWSER_DATA_DIR));
        }

        let scheduler = Scheduler::new(workflow, self.registry.clone());
        let runs = self.runs.clone();
        let task_workflow_id = workflow_id.clone();
        info!(%workflow_id, %run_id, "starting run");

        let handle = tokio::spawn(async move {
            let summary = scheduler.run(&mut ctx).await;
            runs.lock().expect("runs map poisoned").remove(&task_workflow_id);
            info!(workflow_id = %task_workflow_id, status = %summary.status, "run finished");
            summary
        });

        Ok((run_id, handle))
    }

    /// Request a stop: set the cancellation flag, wake every blocked
    /// rendezvous, then terminate supervised child processes. The run's
    /// scheduler observes the flag at its next step or suspension point.
    pub async fn stop_run(&self, workflow_id: &str) -> bool {
        let cancel = {
            let runs = self.runs.lock().expect("runs map poisoned");
            runs.get(workflow_id).map(|run| run.cancel.clone())
        };
        let Some(cancel) = cancel else {
            debug!(%workflow_id, "stop_run: not running");
            return false;
        };

        info!(%workflow_id, "stop requested");
        cancel.signal();
        self.services.rendezvous.release_all("stop requested");
        self.services.processes.terminate_all().await;
        true
    }

    /// Stop every run and auxiliary server (daemon shutdown).
    pub async fn shutdown(&self) {
        let workflow_ids: Vec<String> = self.runs.lock().expect("runs map poisoned").keys().cloned().collect();
        for workflow_id in workflow_ids {
            self.stop_run(&workflow_id).await;
        }
        self.services.servers.stop_all().await;
    }

    pub fn is_running(&self, workflow_id: &str) -> bool {
        self.runs.lock().expect("runs map poisoned").contains_key(workflow_id)
    }

    pub fn running_count(&self) -> usize {
        self.runs.lock().expect("runs map poisoned").len()
    }

    /// Run id of the active run for a workflow, if any.
    pub fn run_id_for(&self, workflow_id: &str) -> Option<String> {
        self.runs
            .lock()
            .expect("runs map poisoned")
            .get(workflow_id)
            .map(|run| run.run_id.clone())
    }

    /// Bind the hotkey bridge to a workflow.
    pub fn set_current_workflow(&self, workflow_id: Option<String>) {
        debug!(?workflow_id, "set_current_workflow");
        *self.current_workflow.lock().expect("current workflow poisoned") = workflow_id;
    }

    pub fn current_workflow(&self) -> Option<String> {
        self.current_workflow.lock().expect("current workflow poisoned").clone()
    }

    /// Deliver an observer's rendezvous reply. Unknown or malformed ids are
    /// ignored (the worker may have timed out already).
    pub fn rendezvous_reply(&self, request_id: &str, payload: Value) -> bool {
        match Uuid::parse_str(request_id) {
            Ok(id) => self.services.rendezvous.deliver_reply(id, payload),
            Err(_) => {
                warn!(%request_id, "rendezvous reply with malformed request id");
                false
            }
        }
    }

    /// React to a hotkey command from the bridge.
    pub async fn handle_hotkey(&self, command: HotkeyCommand) {
        let bound = self.current_workflow();
        self.event_bus.emit(FlowEvent::Hotkey {
            run_id: bound.clone().unwrap_or_default(),
            command: command.as_str().to_string(),
        });

        match command {
            HotkeyCommand::Run => {
                let Some(workflow_id) = bound else {
                    warn!("hotkey run with no bound workflow");
                    return;
                };
                if self.is_running(&workflow_id) {
                    debug!(%workflow_id, "hotkey run: already running");
                    return;
                }
                let workflow = self
                    .workflows
                    .lock()
                    .expect("workflow cache poisoned")
                    .get(&workflow_id)
                    .cloned();
                match workflow {
                    Some(workflow) => {
                        if let Err(e) = self.start_run((*workflow).clone(), false, None) {
                            warn!(%workflow_id, error = %e, "hotkey run failed");
                        }
                    }
                    None => warn!(%workflow_id, "hotkey run: workflow definition unknown to this bus"),
                }
            }
            HotkeyCommand::Stop => {
                if let Some(workflow_id) = bound {
                    self.stop_run(&workflow_id).await;
                }
            }
            // Macro recording happens observer-side; the event is enough.
            HotkeyCommand::MacroStart | HotkeyCommand::MacroStop => {}
        }
    }
}
