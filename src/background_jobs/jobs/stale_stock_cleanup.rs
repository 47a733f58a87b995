//! Periodic stale stock cleanup.
//!
//! The default interval is daily; the coordinator reschedules or disables
//! it according to the operator's settings.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
};
use crate::cleanup::{CleanupCoordinator, CleanupError};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const STALE_STOCK_CLEANUP_JOB_ID: &str = "stale_stock_cleanup";

pub struct StaleStockCleanupJob {
    coordinator: Arc<CleanupCoordinator>,
}

impl StaleStockCleanupJob {
    pub fn new(coordinator: Arc<CleanupCoordinator>) -> Self {
        Self { coordinator }
    }
}

impl BackgroundJob for StaleStockCleanupJob {
    fn id(&self) -> &'static str {
        STALE_STOCK_CLEANUP_JOB_ID
    }

    fn name(&self) -> &'static str {
        "Stale Stock Cleanup"
    }

    fn description(&self) -> &'static str {
        "Delete published products that have been out of stock past the age threshold"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(Duration::from_secs(24 * 60 * 60))
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // The processor cannot stop mid-run
        ShutdownBehavior::WaitForCompletion
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        if !self.coordinator.settings().scheduled_cleanup {
            info!("Scheduled cleanup is disabled, skipping");
            return Ok(());
        }

        match self.coordinator.run_scheduled() {
            Ok(outcome) => {
                info!("Scheduled cleanup finished: {:?}", outcome);
                Ok(())
            }
            Err(CleanupError::AlreadyRunning { started_at }) => {
                info!(
                    "Cleanup run already in progress since {}, skipping scheduled run",
                    started_at
                );
                Ok(())
            }
            Err(e) => Err(JobError::ExecutionFailed(e.to_string())),
        }
    }
}
