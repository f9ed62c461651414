//! Task progress broadcaster for real-time status streaming.
//!
//! Every update carries the full task snapshot so subscribers never need
//! to reconstruct state from deltas. Lagging receivers drop the oldest
//! events and resynchronize from the next snapshot.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::task::ProcessingTask;

/// Broadcasts task snapshots for streaming.
#[derive(Clone)]
pub struct TaskProgressBroadcaster {
    sender: Arc<broadcast::Sender<ProcessingTask>>,
}

impl TaskProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a snapshot to all subscribers.
    pub fn send(&self, task: ProcessingTask) {
        // No active receivers is fine.
        let _ = self.sender.send(task);
    }

    /// Creates a new subscriber for task snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessingTask> {
        self.sender.subscribe()
    }

    /// Waits for the next snapshot of one specific task, skipping
    /// snapshots of other tasks.
    pub async fn next_for(
        rx: &mut broadcast::Receiver<ProcessingTask>,
        task_id: &str,
    ) -> Option<ProcessingTask> {
        loop {
            match rx.recv().await {
                Ok(task) if task.id == task_id => return Some(task),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Default for TaskProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
