use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Best-effort periodic and on-demand invocation of registered jobs.
///
/// All methods are synchronous and never wait for a job to run, so they can
/// be called from blocking threads and async handlers alike.
pub trait PeriodicTrigger: Send + Sync {
    /// Run `job_id` every `interval`, first run one interval from now unless
    /// an earlier run is already planned.
    fn schedule(&self, job_id: &str, interval: Duration) -> Result<()>;

    /// Stop periodic runs of `job_id`. Explicit `fire_now` still works.
    fn unschedule(&self, job_id: &str) -> Result<()>;

    fn next_fire_time(&self, job_id: &str) -> Option<DateTime<Utc>>;

    /// Ask the scheduler to start `job_id` as soon as possible. Returns once
    /// the request is queued.
    fn fire_now(&self, job_id: &str) -> Result<()>;
}
