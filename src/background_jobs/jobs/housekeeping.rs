//! Daily pruning of gone-tracking records and old run log lines.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
};
use crate::cleanup::RunLog;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const HOUSEKEEPING_JOB_ID: &str = "housekeeping";

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

pub struct HousekeepingJob {
    run_log: Arc<RunLog>,
    gone_retention_days: u64,
    log_retention_days: u64,
}

impl HousekeepingJob {
    pub fn new(run_log: Arc<RunLog>, gone_retention_days: u64, log_retention_days: u64) -> Self {
        Self {
            run_log,
            gone_retention_days,
            log_retention_days,
        }
    }
}

fn cutoff(now: i64, days: u64) -> i64 {
    now - days as i64 * SECONDS_PER_DAY
}

impl BackgroundJob for HousekeepingJob {
    fn id(&self) -> &'static str {
        HOUSEKEEPING_JOB_ID
    }

    fn name(&self) -> &'static str {
        "Housekeeping"
    }

    fn description(&self) -> &'static str {
        "Prune expired gone records and old cleanup log lines"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(Duration::from_secs(24 * 60 * 60))
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let now = Utc::now().timestamp();

        let gone_pruned = ctx
            .status_store
            .prune_deleted_items(cutoff(now, self.gone_retention_days))
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let log_pruned = self
            .run_log
            .prune_older_than(cutoff(now, self.log_retention_days))
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        info!(
            "Housekeeping pruned {} gone records and {} log lines",
            gone_pruned, log_pruned
        );
        Ok(())
    }
}
