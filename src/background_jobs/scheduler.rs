use super::context::JobContext;
use super::handle::{
    interval_override, IntervalOverrides, SchedulerCommand, SchedulerHandle, SharedJobState,
};
use super::job::{BackgroundJob, HookEvent, JobError, ShutdownBehavior};
use crate::server::metrics;
use crate::status_store::{JobRunStatus, JobScheduleState, StatusStore};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on how long the loop sleeps without re-checking schedules.
const MAX_SLEEP: Duration = Duration::from_secs(60);

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    overrides: IntervalOverrides,

    /// Currently running jobs with their task handles (not shared, managed by scheduler loop)
    running_handles: HashMap<String, JoinHandle<()>>,

    /// Cancellation tokens for each running job.
    job_cancel_tokens: HashMap<String, CancellationToken>,

    /// Status store for persisting job history.
    status_store: Arc<dyn StatusStore>,

    /// Receiver for commands from SchedulerHandle
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,
}

impl JobScheduler {
    pub fn new(
        status_store: Arc<dyn StatusStore>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        shared_state: Arc<RwLock<SharedJobState>>,
        overrides: IntervalOverrides,
    ) -> Self {
        Self {
            shared_state,
            overrides,
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            status_store,
            command_receiver,
            shutdown_token,
            job_context,
        }
    }

    /// Register a job with the scheduler.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        let mut state = self.shared_state.write().await;
        state.jobs.insert(job_id, job);
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        match self.status_store.mark_stale_jobs_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale jobs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale jobs: {}", e);
            }
        }

        self.trigger_jobs_for_hook(HookEvent::OnStartup).await;

        loop {
            self.cleanup_completed_jobs().await;

            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::FireNow { job_id } => {
                if let Err(e) = self.fire_job(&job_id).await {
                    warn!("fire_now for {} ignored: {}", job_id, e);
                }
            }
            SchedulerCommand::Reschedule => {
                debug!("Schedules changed, recomputing next wake-up");
            }
        }
    }

    async fn fire_job(&mut self, job_id: &str) -> Result<(), JobError> {
        let state = self.shared_state.read().await;
        if !state.jobs.contains_key(job_id) {
            return Err(JobError::NotFound);
        }
        if state.running_jobs.contains(job_id) {
            return Err(JobError::AlreadyRunning);
        }
        drop(state);

        self.spawn_job(job_id, "fire_now").await;
        Ok(())
    }

    /// Effective interval of a job: a runtime override wins over the job's
    /// own schedule.
    fn effective_interval(&self, job_id: &str, job: &Arc<dyn BackgroundJob>) -> Option<Duration> {
        match interval_override(&self.overrides, job_id) {
            Some(interval) => interval,
            None => job.schedule().interval(),
        }
    }

    /// Calculate time until the next scheduled job should run.
    async fn time_until_next_scheduled_job(&self) -> Duration {
        let mut min_duration = MAX_SLEEP;

        let state = self.shared_state.read().await;
        for (job_id, job) in &state.jobs {
            if state.running_jobs.contains(job_id) {
                continue;
            }

            if let Some(next_run) = self.get_next_run_time(job_id, job) {
                let now = Utc::now();
                if next_run > now {
                    let duration = (next_run - now).to_std().unwrap_or(Duration::from_secs(1));
                    if duration < min_duration {
                        min_duration = duration;
                    }
                } else {
                    return Duration::from_secs(0);
                }
            }
        }

        min_duration
    }

    /// Next scheduled run time of an interval job. A job without schedule
    /// state is due immediately.
    fn get_next_run_time(&self, job_id: &str, job: &Arc<dyn BackgroundJob>) -> Option<DateTime<Utc>> {
        self.effective_interval(job_id, job)?;
        match self.status_store.get_schedule_state(job_id) {
            Ok(Some(state)) => Some(state.next_run_at),
            Ok(None) => Some(Utc::now()),
            Err(e) => {
                warn!("Failed to read schedule state for {}: {}", job_id, e);
                None
            }
        }
    }

    async fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let mut jobs_to_run = Vec::new();

        {
            let state = self.shared_state.read().await;
            for (job_id, job) in &state.jobs {
                if state.running_jobs.contains(job_id) {
                    continue;
                }

                if let Some(next_run) = self.get_next_run_time(job_id, job) {
                    if next_run <= now {
                        jobs_to_run.push(job_id.clone());
                    }
                }
            }
        }

        for job_id in jobs_to_run {
            self.spawn_job(&job_id, "schedule").await;
        }
    }

    async fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let mut jobs_to_trigger = Vec::new();

        {
            let state = self.shared_state.read().await;
            for (job_id, job) in &state.jobs {
                if state.running_jobs.contains(job_id) {
                    debug!("Skipping hook trigger for already running job: {}", job_id);
                    continue;
                }
                if job.schedule().listens_to(event) {
                    jobs_to_trigger.push(job_id.clone());
                }
            }
        }

        for job_id in jobs_to_trigger {
            let trigger = format!("hook:{}", event);
            self.spawn_job(&job_id, &trigger).await;
        }
    }

    /// Record the next run of an interval job, one interval from now.
    fn advance_schedule(&self, job_id: &str, interval: Duration, last_run_at: Option<DateTime<Utc>>) {
        let next_run = Utc::now() + chrono::Duration::from_std(interval).unwrap_or_default();
        let schedule_state = JobScheduleState {
            job_id: job_id.to_string(),
            next_run_at: next_run,
            last_run_at,
        };
        if let Err(e) = self.status_store.update_schedule_state(&schedule_state) {
            warn!("Failed to update schedule state for {}: {}", job_id, e);
        }
    }

    /// Spawn a job execution task.
    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let job = {
            let state = self.shared_state.read().await;
            match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => {
                    error!("Attempted to spawn unknown job: {}", job_id);
                    return;
                }
            }
        };

        let run_id = match self.status_store.record_job_start(job_id, triggered_by) {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to record job start for {}: {}", job_id, e);
                return;
            }
        };

        info!(
            "Starting job: {} (run_id: {}, triggered_by: {})",
            job_id, run_id, triggered_by
        );

        {
            let mut state = self.shared_state.write().await;
            state.running_jobs.insert(job_id.to_string());
        }

        // Push next_run_at forward before the job completes, so a slow job
        // is not picked up again by the next loop iteration.
        if let Some(interval) = self.effective_interval(job_id, &job) {
            let last_run_at = self
                .status_store
                .get_schedule_state(job_id)
                .ok()
                .flatten()
                .and_then(|s| s.last_run_at);
            self.advance_schedule(job_id, interval, last_run_at);
        }

        metrics::set_background_job_running(job_id, true);

        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());

        let ctx = self.job_context.for_run(cancel_token, triggered_by);

        let status_store = Arc::clone(&self.status_store);
        let job_id_owned = job_id.to_string();
        let shared_state = Arc::clone(&self.shared_state);

        // Jobs are synchronous, run them on the blocking pool
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let joined = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let outcome = RunOutcome::classify(joined);
            let elapsed = started.elapsed();

            match &outcome.error {
                None => info!("Job {} finished in {:?}", job_id_owned, elapsed),
                Some(msg) => warn!(
                    "Job {} ended as {} after {:?}: {}",
                    job_id_owned, outcome.label, elapsed, msg
                ),
            }

            metrics::record_background_job_execution(&job_id_owned, outcome.label, elapsed);
            metrics::set_background_job_running(&job_id_owned, false);

            if let Err(e) = status_store.record_job_finish(run_id, outcome.status, outcome.error) {
                error!("Failed to record job finish for {}: {}", job_id_owned, e);
            }

            shared_state.write().await.running_jobs.remove(&job_id_owned);
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    /// Update schedule state after a job completes (for interval-based jobs).
    async fn update_schedule_after_run(&self, job_id: &str) {
        let job = {
            let state = self.shared_state.read().await;
            match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => return,
            }
        };

        if let Some(interval) = self.effective_interval(job_id, &job) {
            self.advance_schedule(job_id, interval, Some(Utc::now()));
        }
    }

    /// Clean up handles for completed jobs.
    async fn cleanup_completed_jobs(&mut self) {
        let mut completed = Vec::new();

        for (job_id, handle) in &self.running_handles {
            if handle.is_finished() {
                completed.push(job_id.clone());
            }
        }

        for job_id in completed {
            if let Some(handle) = self.running_handles.remove(&job_id) {
                let _ = handle.await;
            }
            self.job_cancel_tokens.remove(&job_id);
            self.update_schedule_after_run(&job_id).await;
        }
    }

    /// Cancel what can be cancelled, then give every running job up to
    /// `SHUTDOWN_GRACE` to finish.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        let handles: Vec<(String, JoinHandle<()>)> = self.running_handles.drain().collect();
        {
            let state = self.shared_state.read().await;
            for (job_id, _) in &handles {
                let behavior = state
                    .jobs
                    .get(job_id)
                    .map(|job| job.shutdown_behavior())
                    .unwrap_or(ShutdownBehavior::Cancellable);
                match behavior {
                    ShutdownBehavior::Cancellable => {
                        if let Some(token) = self.job_cancel_tokens.get(job_id) {
                            debug!("Cancelling job: {}", job_id);
                            token.cancel();
                        }
                    }
                    ShutdownBehavior::WaitForCompletion => {
                        info!("Waiting for job {} to complete...", job_id);
                    }
                }
            }
        }

        for (job_id, handle) in handles {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("Job {} still running at shutdown", job_id);
            }
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

/// How a single job execution ended, as recorded in history and metrics.
struct RunOutcome {
    status: JobRunStatus,
    label: &'static str,
    error: Option<String>,
}

impl RunOutcome {
    fn classify(joined: Result<Result<(), JobError>, tokio::task::JoinError>) -> Self {
        let (status, label, error) = match joined {
            Ok(Ok(())) => (JobRunStatus::Completed, "success", None),
            Ok(Err(JobError::Cancelled)) => {
                (JobRunStatus::Failed, "cancelled", Some("Cancelled".to_string()))
            }
            Ok(Err(e)) => (JobRunStatus::Failed, "failed", Some(e.to_string())),
            Err(e) => (JobRunStatus::Failed, "panic", Some(format!("Task panic: {}", e))),
        };
        Self {
            status,
            label,
            error,
        }
    }
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    status_store: Arc<dyn StatusStore>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState {
        jobs: HashMap::new(),
        running_jobs: HashSet::new(),
    }));
    let overrides = IntervalOverrides::default();

    let scheduler = JobScheduler::new(
        status_store.clone(),
        command_rx,
        shutdown_token,
        job_context,
        Arc::clone(&shared_state),
        Arc::clone(&overrides),
    );

    let handle = SchedulerHandle::new(command_tx, shared_state, overrides, status_store);

    (scheduler, handle)
}
