//! Read-only snapshot of the cleanup run for polling clients.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::run_log::RunLog;
use super::settings::CleanupLimits;
use crate::background_jobs::jobs::STALE_STOCK_CLEANUP_JOB_ID;
use crate::background_jobs::PeriodicTrigger;
use crate::status_store::{RunState, StatusStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub state: &'static str,
    pub is_running: bool,
    pub is_completed: bool,
    pub too_many: bool,
    pub elapsed_secs: Option<i64>,
    /// Informational only, nothing is cancelled.
    pub is_stuck: bool,
    pub has_log: bool,
    pub products_processed: u64,
    pub products_deleted: u64,
    pub last_result_count: Option<u64>,
    pub too_many_count: Option<u64>,
    pub last_scheduled_run_at: Option<i64>,
    pub next_scheduled_run_at: Option<i64>,
    pub manual_run_limit: u64,
}

pub struct StatusService {
    status_store: Arc<dyn StatusStore>,
    run_log: Arc<RunLog>,
    trigger: Arc<dyn PeriodicTrigger>,
    limits: CleanupLimits,
}

impl StatusService {
    pub fn new(
        status_store: Arc<dyn StatusStore>,
        run_log: Arc<RunLog>,
        trigger: Arc<dyn PeriodicTrigger>,
        limits: CleanupLimits,
    ) -> Self {
        Self {
            status_store,
            run_log,
            trigger,
            limits,
        }
    }

    pub fn snapshot(&self) -> Result<StatusSnapshot> {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Result<StatusSnapshot> {
        let raw = self.status_store.load_run_status()?;
        let state = RunState::from_raw(&raw);

        let elapsed_secs = state
            .started_at()
            .map(|started_at| (now.timestamp() - started_at).max(0));
        let is_stuck = elapsed_secs.is_some_and(|elapsed| elapsed > self.limits.stuck_after_secs);

        let has_log = self.run_log.has_content().unwrap_or_else(|e| {
            warn!("Failed to check cleanup log: {:#}", e);
            false
        });

        Ok(StatusSnapshot {
            state: state.as_str(),
            is_running: state.is_running(),
            is_completed: !state.is_running() && raw.last_result_count.is_some(),
            too_many: raw.too_many_count.is_some_and(|count| count > 0),
            elapsed_secs,
            is_stuck,
            has_log,
            products_processed: raw.products_processed.unwrap_or(0),
            products_deleted: raw.products_deleted.unwrap_or(0),
            last_result_count: raw.last_result_count,
            too_many_count: raw.too_many_count,
            last_scheduled_run_at: raw.last_scheduled_run_at,
            next_scheduled_run_at: self
                .trigger
                .next_fire_time(STALE_STOCK_CLEANUP_JOB_ID)
                .map(|t| t.timestamp()),
            manual_run_limit: self.limits.manual_run_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_store::{SqliteStatusStore, StatusKey};
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FixedTrigger(Option<DateTime<Utc>>);

    impl PeriodicTrigger for FixedTrigger {
        fn schedule(&self, _job_id: &str, _interval: Duration) -> anyhow::Result<()> {
            Ok(())
        }

        fn unschedule(&self, _job_id: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn next_fire_time(&self, _job_id: &str) -> Option<DateTime<Utc>> {
            self.0
        }

        fn fire_now(&self, _job_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn service(next: Option<DateTime<Utc>>) -> (StatusService, Arc<SqliteStatusStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStatusStore::new(temp_dir.path().join("status.db")).unwrap());
        let run_log = Arc::new(RunLog::new(store.clone()));
        let service = StatusService::new(
            store.clone(),
            run_log,
            Arc::new(FixedTrigger(next)),
            CleanupLimits::default(),
        );
        (service, store, temp_dir)
    }

    #[test]
    fn test_idle_snapshot() {
        let (service, _store, _temp_dir) = service(None);
        let snapshot = service.snapshot_at(now()).unwrap();

        assert_eq!(snapshot.state, "idle");
        assert!(!snapshot.is_running);
        assert!(!snapshot.is_completed);
        assert!(!snapshot.too_many);
        assert_eq!(snapshot.elapsed_secs, None);
        assert!(!snapshot.is_stuck);
        assert!(!snapshot.has_log);
        assert_eq!(snapshot.manual_run_limit, 200);
        assert_eq!(snapshot.next_scheduled_run_at, None);
    }

    #[test]
    fn test_run_started_fifteen_minutes_ago_is_stuck() {
        let (service, store, _temp_dir) = service(None);
        store
            .save_run_state(&RunState::Running {
                started_at: now().timestamp() - 15 * 60,
            })
            .unwrap();
        store.set_slot(StatusKey::ProductsProcessed, "40").unwrap();
        store.set_slot(StatusKey::ProductsDeleted, "38").unwrap();

        let snapshot = service.snapshot_at(now()).unwrap();

        assert!(snapshot.is_running);
        assert!(snapshot.is_stuck);
        assert_eq!(snapshot.elapsed_secs, Some(900));
        assert_eq!(snapshot.products_processed, 40);
        assert_eq!(snapshot.products_deleted, 38);
        assert!(!snapshot.is_completed);
    }

    #[test]
    fn test_recent_run_is_not_stuck() {
        let (service, store, _temp_dir) = service(None);
        store
            .save_run_state(&RunState::Running {
                started_at: now().timestamp() - 600,
            })
            .unwrap();

        let snapshot = service.snapshot_at(now()).unwrap();
        assert_eq!(snapshot.elapsed_secs, Some(600));
        assert!(!snapshot.is_stuck);
    }

    #[test]
    fn test_completed_and_too_many_snapshots() {
        let (service, store, _temp_dir) = service(Some(now()));

        store
            .save_run_state(&RunState::Completed { deleted: 3 })
            .unwrap();
        let snapshot = service.snapshot_at(now()).unwrap();
        assert!(snapshot.is_completed);
        assert_eq!(snapshot.last_result_count, Some(3));
        assert_eq!(snapshot.next_scheduled_run_at, Some(now().timestamp()));

        store
            .save_run_state(&RunState::TooMany { eligible: 250 })
            .unwrap();
        let snapshot = service.snapshot_at(now()).unwrap();
        assert!(!snapshot.is_completed);
        assert!(snapshot.too_many);
        assert_eq!(snapshot.too_many_count, Some(250));
        assert_eq!(snapshot.state, "too_many");
    }

    #[test]
    fn test_has_log_after_write() {
        let (service, store, _temp_dir) = service(None);
        crate::status_store::RunLogSink::write_line(store.as_ref(), "hello").unwrap();
        assert!(service.snapshot_at(now()).unwrap().has_log);
    }
}
