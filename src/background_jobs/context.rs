use crate::status_store::StatusStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Access to run state, job history and schedules.
    pub status_store: Arc<dyn StatusStore>,

    /// What started this execution: "schedule", "fire_now", "hook:OnStartup".
    pub triggered_by: String,
}

impl JobContext {
    pub fn new(cancellation_token: CancellationToken, status_store: Arc<dyn StatusStore>) -> Self {
        Self {
            cancellation_token,
            status_store,
            triggered_by: String::new(),
        }
    }

    /// Derive a per-execution context.
    pub fn for_run(&self, cancellation_token: CancellationToken, triggered_by: &str) -> Self {
        Self {
            cancellation_token,
            status_store: Arc::clone(&self.status_store),
            triggered_by: triggered_by.to_string(),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
