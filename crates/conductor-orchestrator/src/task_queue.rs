use conductor_core::{Task, TaskResult};
use tokio::sync::oneshot;

/// A task waiting in a worker queue together with the channel its terminal
/// result is sent on.
pub struct QueuedTask {
    /// The task as submitted.
    pub task: Task,
    /// Resolves the submitter's receiver.
    pub responder: oneshot::Sender<TaskResult>,
}

impl QueuedTask {
    /// Deliver the terminal result. The caller may have stopped waiting.
    pub fn respond(self, result: TaskResult) {
        let _ = self.responder.send(result);
    }
}

/// Per-worker task queue ordered by priority, then creation time.
pub struct TaskQueue {
    entries: Vec<QueuedTask>,
}

impl TaskQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a task and return the receiver for its result.
    pub fn push(&mut self, task: Task) -> oneshot::Receiver<TaskResult> {
        let (responder, rx) = oneshot::channel();
        self.entries.push(QueuedTask { task, responder });
        rx
    }

    /// Remove the next task: highest priority first, oldest first among equals.
    pub fn pop_next(&mut self) -> Option<QueuedTask> {
        if self.entries.is_empty() {
            return None;
        }
        self.entries.sort_by(|a, b| {
            b.task
                .priority
                .cmp(&a.task.priority)
                .then_with(|| a.task.created_at.cmp(&b.task.created_at))
        });
        Some(self.entries.remove(0))
    }

    /// Remove every queued task.
    pub fn drain_all(&mut self) -> Vec<QueuedTask> {
        std::mem::take(&mut self.entries)
    }

    /// Number of tasks waiting.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no task is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
