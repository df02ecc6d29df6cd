//! Owned background tasks.
//!
//! Periodic work (lease ticks, auto-refresh) is spawned onto the runtime and
//! owned through a `TaskHandle`. Dropping the handle aborts the task, so a
//! session tears down its timers simply by going out of scope.

use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn new(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Abort the task now. Equivalent to dropping the handle.
    pub fn cancel(self) {}
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            tracing::debug!(task = self.name, "Cancelling background task");
        }
        self.handle.abort();
    }
}
