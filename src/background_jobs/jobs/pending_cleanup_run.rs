//! Executes a manual run the coordinator deferred.
//!
//! Fired on demand right after a deferred start, and once at startup so a
//! run left behind by a restart completes.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use crate::cleanup::{CleanupCoordinator, EnsureOutcome, FallbackSource};
use std::sync::Arc;
use tracing::{debug, info};

pub const PENDING_CLEANUP_RUN_JOB_ID: &str = "pending_cleanup_run";

pub struct PendingCleanupRunJob {
    coordinator: Arc<CleanupCoordinator>,
}

impl PendingCleanupRunJob {
    pub fn new(coordinator: Arc<CleanupCoordinator>) -> Self {
        Self { coordinator }
    }

    fn source_for(triggered_by: &str) -> FallbackSource {
        if triggered_by.starts_with("hook:") {
            FallbackSource::Startup
        } else {
            FallbackSource::Dispatch
        }
    }
}

impl BackgroundJob for PendingCleanupRunJob {
    fn id(&self) -> &'static str {
        PENDING_CLEANUP_RUN_JOB_ID
    }

    fn name(&self) -> &'static str {
        "Pending Cleanup Run"
    }

    fn description(&self) -> &'static str {
        "Complete a cleanup run that was started but not executed"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Hook(HookEvent::OnStartup)
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::WaitForCompletion
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let source = Self::source_for(&ctx.triggered_by);
        match self.coordinator.ensure_run_completes(source) {
            Ok(EnsureOutcome::Executed { deleted }) => {
                info!(
                    "Pending cleanup run completed ({}), {} products deleted",
                    source.as_str(),
                    deleted
                );
                Ok(())
            }
            Ok(outcome) => {
                debug!("No pending cleanup run to execute: {:?}", outcome);
                Ok(())
            }
            Err(e) => Err(JobError::ExecutionFailed(e.to_string())),
        }
    }
}
