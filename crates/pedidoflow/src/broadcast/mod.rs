//! Real-time streaming of task state.

pub mod task_progress;

pub use task_progress::TaskProgressBroadcaster;
