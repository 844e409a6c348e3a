//! Built-in module executors
//!
//! Each file groups one family of modules. The full module library of the
//! platform lives outside the core; these are the leaves the engine itself
//! ships (variables, logging, control flow, data rows, rendezvous dialogs,
//! media transcoding, auxiliary servers).

mod basic;
mod control;
mod data;
mod media;
mod prompt;
mod share;

pub use basic::{
    GetTimeExecutor, GroupExecutor, PrintLogExecutor, RandomNumberExecutor, SetVariableExecutor, StartExecutor,
    WaitExecutor,
};
pub use control::{BreakLoopExecutor, ConditionalExecutor, ContinueLoopExecutor};
pub use data::{AddDataExecutor, CommitRowExecutor, ExportLogsExecutor};
pub use media::TranscodeMediaExecutor;
pub use prompt::{InputPromptExecutor, PlayMediaExecutor, ScriptEvalExecutor, SpeakTextExecutor, ViewImageExecutor};
pub use share::{StartFileShareExecutor, StartScreenShareExecutor, StopFileShareExecutor, StopScreenShareExecutor};

use super::ModuleExecutor;

/// Every built-in executor, used to populate the standard registry.
pub fn all() -> Vec<Box<dyn ModuleExecutor>> {
    vec![
        Box::new(StartExecutor),
        Box::new(GroupExecutor),
        Box::new(SetVariableExecutor),
        Box::new(PrintLogExecutor),
        Box::new(RandomNumberExecutor),
        Box::new(GetTimeExecutor),
        Box::new(WaitExecutor),
        Box::new(ConditionalExecutor),
        Box::new(BreakLoopExecutor),
        Box::new(ContinueLoopExecutor),
        Box::new(AddDataExecutor),
        Box::new(CommitRowExecutor),
        Box::new(ExportLogsExecutor),
        Box::new(InputPromptExecutor),
        Box::new(ScriptEvalExecutor),
        Box::new(PlayMediaExecutor),
        Box::new(ViewImageExecutor),
        Box::new(SpeakTextExecutor),
        Box::new(TranscodeMediaExecutor),
        Box::new(StartFileShareExecutor),
        Box::new(StopFileShareExecutor),
        Box::new(StartScreenShareExecutor),
        Box::new(StopScreenShareExecutor),
    ]
}
