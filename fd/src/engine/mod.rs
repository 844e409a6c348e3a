//! Execution engine - graph traversal and loop state

mod loops;
mod scheduler;

pub use loops::{LoopErrorPolicy, LoopFrame, LoopKind, advance_frame, init_frame, is_loop_header};
pub use scheduler::{RunSummary, Scheduler};
