//! Task context shared between the pipeline stages.

use tokio_util::sync::CancellationToken;

/// Identity and cancellation state for one bot task.
///
/// Created by the task listener when a job starts and threaded through the
/// selection session, the executor and the merge engine. Cancellation is
/// cooperative: the token is polled before each new file and after each
/// subprocess exit.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: u64,
    pub chat_id: i64,
    /// User allowed to drive interactive dialogs for this task
    pub requester_id: i64,
    /// Display name for status entries
    pub name: String,
    /// Task retains its data (seeding); merge must not delete inputs
    pub keep_data: bool,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(task_id: u64, chat_id: i64, requester_id: i64, name: impl Into<String>) -> Self {
        Self {
            task_id,
            chat_id,
            requester_id,
            name: name.into(),
            keep_data: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_keep_data(mut self, keep: bool) -> Self {
        self.keep_data = keep;
        self
    }

    /// Session key for the interactive registry, derived from chat + task identity.
    pub fn session_key(&self) -> String {
        format!("{}_{}", self.chat_id, self.task_id)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Awaitable cancellation edge, for racing against subprocess exits
    /// and session completion.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}
