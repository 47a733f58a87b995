//! Background job scheduling and execution system.
//!
//! Runs the periodic stale stock cleanup, the pending-run job that the
//! coordinator dispatches on demand, and daily housekeeping.

mod context;
mod handle;
mod job;
pub mod jobs;
mod scheduler;
mod trigger;

pub use context::JobContext;
pub use handle::{JobInfo, JobRunInfo, JobScheduleInfo, SchedulerHandle};
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::{create_scheduler, JobScheduler};
pub use trigger::PeriodicTrigger;
