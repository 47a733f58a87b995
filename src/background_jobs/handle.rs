use super::job::{BackgroundJob, JobSchedule};
use super::trigger::PeriodicTrigger;
use crate::status_store::{JobRun, JobScheduleState, StatusStore};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// Information about a registered job for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: JobScheduleInfo,
    pub is_running: bool,
    pub last_run: Option<JobRunInfo>,
    pub next_run_at: Option<String>,
}

/// Serializable schedule information.
#[derive(Debug, Clone, Serialize)]
pub struct JobScheduleInfo {
    #[serde(rename = "type")]
    pub schedule_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Vec<String>>,
}

impl JobScheduleInfo {
    /// Describe `schedule` with a runtime interval override applied.
    fn describe(schedule: JobSchedule, interval_override: Option<Option<Duration>>) -> Self {
        match (schedule, interval_override) {
            (JobSchedule::Interval(_), Some(None)) => JobScheduleInfo {
                schedule_type: "disabled".to_string(),
                value_secs: None,
                hooks: None,
            },
            (JobSchedule::Interval(_), Some(Some(interval)))
            | (JobSchedule::Interval(interval), None) => JobScheduleInfo {
                schedule_type: "interval".to_string(),
                value_secs: Some(interval.as_secs()),
                hooks: None,
            },
            (JobSchedule::Hook(event), _) => JobScheduleInfo {
                schedule_type: "hook".to_string(),
                value_secs: None,
                hooks: Some(vec![event.to_string()]),
            },
        }
    }
}

/// Serializable job run information.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

impl From<JobRun> for JobRunInfo {
    fn from(run: JobRun) -> Self {
        JobRunInfo {
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.map(|dt| dt.to_rfc3339()),
            status: run.status.as_str().to_string(),
            error_message: run.error_message,
            triggered_by: run.triggered_by,
        }
    }
}

/// Command sent to the scheduler.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Start a job as soon as possible.
    FireNow { job_id: String },
    /// Schedules changed; recompute the next wake-up.
    Reschedule,
}

/// Shared state between scheduler and handle.
pub struct SharedJobState {
    /// Static job info (set at registration, never changes)
    pub jobs: HashMap<String, Arc<dyn BackgroundJob>>,
    /// Currently running job IDs
    pub running_jobs: HashSet<String>,
}

/// Runtime interval overrides: `Some(interval)` reschedules a job,
/// `None` disables its periodic runs.
///
/// Behind a synchronous lock because the trigger API is called from
/// blocking threads.
pub type IntervalOverrides = Arc<std::sync::RwLock<HashMap<String, Option<Duration>>>>;

pub(super) fn interval_override(
    overrides: &IntervalOverrides,
    job_id: &str,
) -> Option<Option<Duration>> {
    overrides
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(job_id)
        .copied()
}

/// Handle to interact with the job scheduler from HTTP handlers and the
/// cleanup coordinator.
#[derive(Clone)]
pub struct SchedulerHandle {
    /// Channel to send commands to the scheduler
    command_tx: mpsc::Sender<SchedulerCommand>,
    /// Shared state for reading job info
    shared_state: Arc<RwLock<SharedJobState>>,
    overrides: IntervalOverrides,
    /// Status store for job history and schedule queries
    status_store: Arc<dyn StatusStore>,
}

impl SchedulerHandle {
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        shared_state: Arc<RwLock<SharedJobState>>,
        overrides: IntervalOverrides,
        status_store: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            command_tx,
            shared_state,
            overrides,
            status_store,
        }
    }

    fn job_info(&self, job_id: &str, job: &Arc<dyn BackgroundJob>, is_running: bool) -> Result<JobInfo> {
        let last_run = self
            .status_store
            .get_last_run(job_id)?
            .map(JobRunInfo::from);
        let next_run_at = self.next_fire_time(job_id).map(|dt| dt.to_rfc3339());

        Ok(JobInfo {
            id: job_id.to_string(),
            name: job.name().to_string(),
            description: job.description().to_string(),
            schedule: JobScheduleInfo::describe(
                job.schedule(),
                interval_override(&self.overrides, job_id),
            ),
            is_running,
            last_run,
            next_run_at,
        })
    }

    /// Get information about all registered jobs.
    pub async fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        let state = self.shared_state.read().await;
        let mut jobs = Vec::new();

        for (job_id, job) in &state.jobs {
            let is_running = state.running_jobs.contains(job_id);
            jobs.push(self.job_info(job_id, job, is_running)?);
        }

        // Sort by job ID for consistent ordering
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    /// Get information about a specific job.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>> {
        let state = self.shared_state.read().await;

        match state.jobs.get(job_id) {
            Some(job) => {
                let is_running = state.running_jobs.contains(job_id);
                Ok(Some(self.job_info(job_id, job, is_running)?))
            }
            None => Ok(None),
        }
    }

    /// Get job execution history.
    pub fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRunInfo>> {
        let history = self.status_store.get_job_history(job_id, limit)?;
        Ok(history.into_iter().map(JobRunInfo::from).collect())
    }

    /// Check if a job with the given ID exists.
    pub async fn job_exists(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.jobs.contains_key(job_id)
    }

    fn wake_scheduler(&self) {
        if let Err(e) = self.command_tx.try_send(SchedulerCommand::Reschedule) {
            // A full queue already holds a wake-up.
            debug!("Scheduler wake-up not sent: {}", e);
        }
    }
}

impl PeriodicTrigger for SchedulerHandle {
    fn schedule(&self, job_id: &str, interval: Duration) -> Result<()> {
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string(), Some(interval));

        let desired = Utc::now() + chrono::Duration::from_std(interval)?;
        let current = self.status_store.get_schedule_state(job_id)?;
        let keep_current = matches!(&current, Some(state) if state.next_run_at <= desired);
        if !keep_current {
            self.status_store.update_schedule_state(&JobScheduleState {
                job_id: job_id.to_string(),
                next_run_at: desired,
                last_run_at: current.and_then(|s| s.last_run_at),
            })?;
        }

        self.wake_scheduler();
        Ok(())
    }

    fn unschedule(&self, job_id: &str) -> Result<()> {
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string(), None);
        self.status_store.delete_schedule_state(job_id)?;
        self.wake_scheduler();
        Ok(())
    }

    fn next_fire_time(&self, job_id: &str) -> Option<DateTime<Utc>> {
        if interval_override(&self.overrides, job_id) == Some(None) {
            return None;
        }
        self.status_store
            .get_schedule_state(job_id)
            .ok()
            .flatten()
            .map(|state| state.next_run_at)
    }

    fn fire_now(&self, job_id: &str) -> Result<()> {
        self.command_tx
            .try_send(SchedulerCommand::FireNow {
                job_id: job_id.to_string(),
            })
            .map_err(|e| anyhow!("Failed to queue {} on the scheduler: {}", job_id, e))
    }
}
