//! Run coordination: at most one deletion run at a time, inline or deferred
//! execution, and the fallbacks that make sure a deferred run executes.
//!
//! Lock order is `execution_lock` then `state_lock`. The state lock only
//! guards check-then-set on the persisted run state. The execution lock is
//! held for the whole time the processor runs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::processor::{DeletionOptions, DeletionProcessor};
use super::run_log::RunLog;
use super::settings::{CleanupLimits, CleanupSettings, SettingsError, SettingsUpdate};
use crate::background_jobs::jobs::{PENDING_CLEANUP_RUN_JOB_ID, STALE_STOCK_CLEANUP_JOB_ID};
use crate::background_jobs::PeriodicTrigger;
use crate::server::metrics;
use crate::status_store::{RunState, StatusKey, StatusStore, TransitionError};

/// Which fallback asked for a pending run to be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackSource {
    /// The pending-run job fired on the scheduler.
    Dispatch,
    /// The start request's response has been produced.
    EndOfRequest,
    /// The operator opened the admin page.
    NextPageLoad,
    /// Process startup found a run left behind.
    Startup,
}

impl FallbackSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackSource::Dispatch => "dispatch",
            FallbackSource::EndOfRequest => "end_of_request",
            FallbackSource::NextPageLoad => "next_page_load",
            FallbackSource::Startup => "startup",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The run executed within the call.
    Completed { deleted: u64 },
    /// The run is marked running and will be executed by a fallback.
    Deferred { eligible: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Executed { deleted: u64 },
    /// Another caller is executing right now.
    AlreadyExecuting,
    NothingPending,
}

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("a cleanup run is already in progress (started at {started_at})")]
    AlreadyRunning { started_at: i64 },
    #[error("{eligible} products are eligible, more than the manual limit of {limit}")]
    TooMany { eligible: u64, limit: u64 },
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("cleanup state error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl From<TransitionError> for CleanupError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::AlreadyRunning { started_at } => {
                CleanupError::AlreadyRunning { started_at }
            }
            other => CleanupError::Store(other.into()),
        }
    }
}

pub struct CleanupCoordinator {
    status_store: Arc<dyn StatusStore>,
    processor: DeletionProcessor,
    run_log: Arc<RunLog>,
    trigger: Arc<dyn PeriodicTrigger>,
    default_settings: CleanupSettings,
    limits: CleanupLimits,
    state_lock: Mutex<()>,
    execution_lock: Mutex<()>,
}

impl CleanupCoordinator {
    pub fn new(
        status_store: Arc<dyn StatusStore>,
        processor: DeletionProcessor,
        run_log: Arc<RunLog>,
        trigger: Arc<dyn PeriodicTrigger>,
        default_settings: CleanupSettings,
        limits: CleanupLimits,
    ) -> Self {
        Self {
            status_store,
            processor,
            run_log,
            trigger,
            default_settings,
            limits,
            state_lock: Mutex::new(()),
            execution_lock: Mutex::new(()),
        }
    }

    pub fn limits(&self) -> &CleanupLimits {
        &self.limits
    }

    pub fn run_log(&self) -> &Arc<RunLog> {
        &self.run_log
    }

    pub fn trigger(&self) -> &Arc<dyn PeriodicTrigger> {
        &self.trigger
    }

    /// Effective settings: persisted values, or the config file defaults.
    pub fn settings(&self) -> CleanupSettings {
        CleanupSettings::load_or(self.status_store.as_ref(), &self.default_settings)
    }

    pub fn current_state(&self) -> Result<RunState, CleanupError> {
        let raw = self.status_store.load_run_status()?;
        Ok(RunState::from_raw(&raw))
    }

    fn lock_state(&self) -> MutexGuard<'_, ()> {
        self.state_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lock_execution(&self) -> Option<MutexGuard<'_, ()>> {
        match self.execution_lock.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Take the execution lock for a new run. Rejected when the stored
    /// state is running. Otherwise the holder is between taking the lock
    /// and `begin`, or between `finish` and releasing it, so wait for it and
    /// let `begin` judge the state it leaves behind.
    fn lock_execution_for_run(&self) -> Result<MutexGuard<'_, ()>, CleanupError> {
        if let Some(guard) = self.try_lock_execution() {
            return Ok(guard);
        }
        if let Some(started_at) = self.current_state()?.started_at() {
            return Err(CleanupError::AlreadyRunning { started_at });
        }
        Ok(self
            .execution_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner))
    }

    fn begin(&self, now: i64) -> Result<(), CleanupError> {
        let _state = self.lock_state();
        let next = self.current_state()?.begin(now)?;
        self.status_store.save_run_state(&next)?;
        Ok(())
    }

    fn finish(&self, deleted: u64) -> Result<(), CleanupError> {
        let _state = self.lock_state();
        let current = self.current_state()?;
        let next = current.complete(deleted).unwrap_or_else(|e| {
            warn!(
                "Finishing cleanup run while in state {}: {}",
                current.as_str(),
                e
            );
            RunState::Completed { deleted }
        });
        self.status_store.save_run_state(&next)?;
        Ok(())
    }

    fn refuse_too_many(&self, eligible: u64) -> Result<(), CleanupError> {
        let _state = self.lock_state();
        let next = self.current_state()?.refuse_too_many(eligible)?;
        self.status_store.save_run_state(&next)?;
        Ok(())
    }

    /// Run the processor and record the outcome. The caller holds the
    /// execution lock. A fatal processor error still ends the run, with a
    /// zero result.
    fn execute(&self, options: &DeletionOptions, now: DateTime<Utc>) -> Result<u64, CleanupError> {
        let deleted = match self.processor.run_at(options, now) {
            Ok(report) => {
                metrics::record_cleanup_run("completed");
                report.deleted
            }
            Err(e) => {
                metrics::record_cleanup_run("failed");
                self.run_log.log_fatal(&e.to_string());
                0
            }
        };
        self.finish(deleted)?;
        Ok(deleted)
    }

    pub fn start_manual_run(&self) -> Result<RunOutcome, CleanupError> {
        self.start_manual_run_at(Utc::now())
    }

    /// Operator-started run.
    ///
    /// Refused when more than `manual_run_limit` items are eligible. Small
    /// batches execute inline. Larger ones are left running, with the
    /// pending-run job dispatched and `pending_fallback_at` set, and the
    /// caller is expected to arm the end-of-request fallback.
    pub fn start_manual_run_at(&self, now: DateTime<Utc>) -> Result<RunOutcome, CleanupError> {
        let execution = self.lock_execution_for_run()?;

        self.begin(now.timestamp())?;
        self.run_log.log_run_started("manual");

        let options = DeletionOptions::from(&self.settings());
        let eligible = match self.processor.count_eligible(&options, now) {
            Ok(count) => count,
            Err(e) => {
                metrics::record_cleanup_run("failed");
                self.run_log.log_fatal(&e.to_string());
                self.finish(0)?;
                return Ok(RunOutcome::Completed { deleted: 0 });
            }
        };

        if eligible > self.limits.manual_run_limit {
            metrics::record_cleanup_run("too_many");
            self.run_log
                .log_too_many(eligible, self.limits.manual_run_limit);
            self.refuse_too_many(eligible)?;
            return Err(CleanupError::TooMany {
                eligible,
                limit: self.limits.manual_run_limit,
            });
        }

        if eligible < self.limits.inline_run_threshold {
            let deleted = self.execute(&options, now)?;
            return Ok(RunOutcome::Completed { deleted });
        }

        drop(execution);
        // The other two fallbacks still complete the run without the marker.
        if let Err(e) = self
            .status_store
            .set_slot(StatusKey::PendingFallbackAt, &now.timestamp().to_string())
        {
            warn!("Failed to store pending cleanup run marker: {:#}", e);
        }
        if let Err(e) = self.trigger.fire_now(PENDING_CLEANUP_RUN_JOB_ID) {
            warn!("Failed to dispatch pending cleanup run: {:#}", e);
        }
        metrics::record_cleanup_run("deferred");
        info!(
            "Deferred cleanup run of {} eligible products to background execution",
            eligible
        );
        Ok(RunOutcome::Deferred { eligible })
    }

    pub fn run_scheduled(&self) -> Result<RunOutcome, CleanupError> {
        self.run_scheduled_at(Utc::now())
    }

    /// Periodic run. No eligibility cap.
    pub fn run_scheduled_at(&self, now: DateTime<Utc>) -> Result<RunOutcome, CleanupError> {
        let _execution = self.lock_execution_for_run()?;

        self.begin(now.timestamp())?;
        self.status_store
            .set_slot(StatusKey::LastScheduledRunAt, &now.timestamp().to_string())?;
        self.run_log.log_run_started("scheduled");

        let options = DeletionOptions::from(&self.settings());
        let deleted = self.execute(&options, now)?;
        Ok(RunOutcome::Completed { deleted })
    }

    /// Execute a run that is marked running but has no result yet.
    ///
    /// Safe to call from any number of places: while one caller executes,
    /// the others get `AlreadyExecuting`, and once a result is stored there
    /// is nothing pending.
    pub fn ensure_run_completes(
        &self,
        source: FallbackSource,
    ) -> Result<EnsureOutcome, CleanupError> {
        self.ensure_run_completes_at(source, Utc::now())
    }

    pub fn ensure_run_completes_at(
        &self,
        source: FallbackSource,
        now: DateTime<Utc>,
    ) -> Result<EnsureOutcome, CleanupError> {
        let Some(_execution) = self.try_lock_execution() else {
            debug!(
                "Cleanup run already executing, {} fallback skipped",
                source.as_str()
            );
            return Ok(EnsureOutcome::AlreadyExecuting);
        };

        let state = {
            let _state = self.lock_state();
            self.current_state()?
        };
        if !state.is_running() {
            self.status_store.delete_slot(StatusKey::PendingFallbackAt)?;
            return Ok(EnsureOutcome::NothingPending);
        }

        self.status_store.delete_slot(StatusKey::PendingFallbackAt)?;
        self.run_log.log_run_started(source.as_str());

        let options = DeletionOptions::from(&self.settings());
        let deleted = self.execute(&options, now)?;
        Ok(EnsureOutcome::Executed { deleted })
    }

    /// Next-page-load fallback: only acts when the durable marker is set.
    pub fn check_pending_fallback(&self) -> Result<Option<EnsureOutcome>, CleanupError> {
        if self
            .status_store
            .get_slot(StatusKey::PendingFallbackAt)?
            .is_none()
        {
            return Ok(None);
        }
        self.ensure_run_completes(FallbackSource::NextPageLoad)
            .map(Some)
    }

    /// Collapse a displayed outcome back to idle. Returns the outcome that
    /// was acknowledged, if any.
    pub fn acknowledge(&self) -> Result<Option<RunState>, CleanupError> {
        self.acknowledge_where(|_| true)
    }

    /// Collapse a refused run back to idle. Nothing redirects after a
    /// refusal, so it is cleared on the first page load that shows it.
    pub fn acknowledge_too_many(&self) -> Result<Option<RunState>, CleanupError> {
        self.acknowledge_where(|state| matches!(state, RunState::TooMany { .. }))
    }

    fn acknowledge_where(
        &self,
        filter: impl Fn(&RunState) -> bool,
    ) -> Result<Option<RunState>, CleanupError> {
        let _state = self.lock_state();
        let current = self.current_state()?;
        if !filter(&current) {
            return Ok(None);
        }
        let next = current.acknowledge();
        if next == current {
            return Ok(None);
        }
        self.status_store.save_run_state(&next)?;
        Ok(Some(current))
    }

    /// Validate, schedule, then persist. Settings are only stored once the
    /// schedule accepted them.
    pub fn configure(&self, update: &SettingsUpdate) -> Result<CleanupSettings, CleanupError> {
        let previous = self.settings();
        let settings = previous.apply(update);
        settings.validate()?;
        self.apply_schedule_for(&settings)?;
        if let Err(e) = settings.persist(self.status_store.as_ref()) {
            if let Err(restore) = self.apply_schedule_for(&previous) {
                warn!("Failed to restore cleanup schedule: {}", restore);
            }
            return Err(e.into());
        }
        info!("Cleanup settings updated: {:?}", settings);
        Ok(settings)
    }

    /// Register or remove the periodic run according to current settings.
    pub fn apply_schedule(&self) -> Result<(), CleanupError> {
        self.apply_schedule_for(&self.settings())
    }

    fn apply_schedule_for(&self, settings: &CleanupSettings) -> Result<(), CleanupError> {
        if settings.scheduled_cleanup {
            self.trigger
                .schedule(STALE_STOCK_CLEANUP_JOB_ID, settings.schedule_interval())?;
        } else {
            self.trigger.unschedule(STALE_STOCK_CLEANUP_JOB_ID)?;
        }
        Ok(())
    }
}
