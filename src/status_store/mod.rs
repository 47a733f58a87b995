mod models;
mod run_state;
mod schema;
mod sqlite_status_store;

pub use models::*;
pub use run_state::{RunState, TransitionError};
pub use schema::STATUS_VERSIONED_SCHEMAS;
pub use sqlite_status_store::SqliteStatusStore;

use anyhow::Result;

pub trait StatusStore: Send + Sync {
    // Run status slots
    fn get_slot(&self, key: StatusKey) -> Result<Option<String>>;
    fn set_slot(&self, key: StatusKey, value: &str) -> Result<()>;
    fn delete_slot(&self, key: StatusKey) -> Result<()>;
    fn load_run_status(&self) -> Result<RawRunStatus>;
    /// Persist a lifecycle state, rewriting every slot it implies in a single
    /// transaction.
    fn save_run_state(&self, state: &RunState) -> Result<()>;

    // Job runs
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64>;
    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()>;
    fn get_running_jobs(&self) -> Result<Vec<JobRun>>;
    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>>;
    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>>;
    fn mark_stale_jobs_failed(&self) -> Result<usize>;

    // Schedule state
    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>>;
    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()>;
    fn delete_schedule_state(&self, job_id: &str) -> Result<()>;

    // Deleted items
    fn record_deleted_item(&self, record: &DeletedRecord) -> Result<()>;
    fn find_deleted_item(&self, slug: &str) -> Result<Option<DeletedRecord>>;
    fn prune_deleted_items(&self, before_timestamp: i64) -> Result<usize>;
}

/// Append-only sink for the operator-visible run log.
pub trait RunLogSink: Send + Sync {
    fn write_line(&self, line: &str) -> Result<()>;
    /// Most recent lines, oldest first.
    fn read_recent(&self, limit: usize) -> Result<Vec<RunLogEntry>>;
    fn has_content(&self) -> Result<bool>;
    fn prune_older_than(&self, before_timestamp: i64) -> Result<usize>;
}
