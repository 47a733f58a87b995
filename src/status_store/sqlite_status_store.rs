use super::models::{
    DeletedRecord, JobRun, JobRunStatus, JobScheduleState, RawRunStatus, RunLogEntry, StatusKey,
};
use super::run_state::RunState;
use super::schema::STATUS_VERSIONED_SCHEMAS;
use super::{RunLogSink, StatusStore};
use crate::sqlite_persistence::open_versioned_db;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::warn;

pub struct SqliteStatusStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStatusStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned_db(db_path.as_ref(), STATUS_VERSIONED_SCHEMAS, "status")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    fn upsert_slot(conn: &Connection, key: StatusKey, value: &str) -> rusqlite::Result<()> {
        let now = Self::format_datetime(&Utc::now());
        conn.execute(
            "INSERT INTO run_state (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key.as_str(), value, now],
        )?;
        Ok(())
    }

    fn remove_slot(conn: &Connection, key: StatusKey) -> rusqlite::Result<()> {
        conn.execute(
            "DELETE FROM run_state WHERE key = ?1",
            params![key.as_str()],
        )?;
        Ok(())
    }

    fn parse_slot<T: FromStr>(key: StatusKey, value: &str) -> Option<T> {
        match value.trim().parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!(
                    "Ignoring unparsable value {:?} in status slot {}",
                    value,
                    key.as_str()
                );
                None
            }
        }
    }

    /// Append a log line with an explicit timestamp.
    pub fn write_line_at(&self, timestamp: i64, line: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO run_log (timestamp, line) VALUES (?1, ?2)",
            params![timestamp, line],
        )?;
        Ok(())
    }

    fn row_to_job_run(row: &rusqlite::Row) -> rusqlite::Result<JobRun> {
        let status_str: String = row.get("status")?;
        let status = JobRunStatus::parse(&status_str).unwrap_or(JobRunStatus::Failed);

        let started_at_str: String = row.get("started_at")?;
        let finished_at_str: Option<String> = row.get("finished_at")?;

        Ok(JobRun {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            started_at: Self::parse_datetime(&started_at_str).unwrap_or_else(Utc::now),
            finished_at: finished_at_str.and_then(|s| Self::parse_datetime(&s)),
            status,
            error_message: row.get("error_message")?,
            triggered_by: row.get("triggered_by")?,
        })
    }

    fn row_to_schedule_state(row: &rusqlite::Row) -> rusqlite::Result<JobScheduleState> {
        let next_run_at_str: String = row.get("next_run_at")?;
        let last_run_at_str: Option<String> = row.get("last_run_at")?;

        Ok(JobScheduleState {
            job_id: row.get("job_id")?,
            next_run_at: Self::parse_datetime(&next_run_at_str).unwrap_or_else(Utc::now),
            last_run_at: last_run_at_str.and_then(|s| Self::parse_datetime(&s)),
        })
    }

    fn row_to_deleted_record(row: &rusqlite::Row) -> rusqlite::Result<DeletedRecord> {
        Ok(DeletedRecord {
            slug: row.get("slug")?,
            url: row.get("url")?,
            deleted_at: row.get("deleted_at")?,
        })
    }
}

impl StatusStore for SqliteStatusStore {
    fn get_slot(&self, key: StatusKey) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM run_state WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_slot(&self, key: StatusKey, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::upsert_slot(&conn, key, value)?;
        Ok(())
    }

    fn delete_slot(&self, key: StatusKey) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        Self::remove_slot(&conn, key)?;
        Ok(())
    }

    fn load_run_status(&self) -> Result<RawRunStatus> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT key, value FROM run_state")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut raw = RawRunStatus::default();
        for (key, value) in rows {
            let k = key.as_str();
            if k == StatusKey::StartedAt.as_str() {
                raw.started_at = Self::parse_slot(StatusKey::StartedAt, &value);
            } else if k == StatusKey::LastResultCount.as_str() {
                raw.last_result_count = Self::parse_slot(StatusKey::LastResultCount, &value);
            } else if k == StatusKey::TooManyCount.as_str() {
                raw.too_many_count = Self::parse_slot(StatusKey::TooManyCount, &value);
            } else if k == StatusKey::LastScheduledRunAt.as_str() {
                raw.last_scheduled_run_at =
                    Self::parse_slot(StatusKey::LastScheduledRunAt, &value);
            } else if k == StatusKey::PendingFallbackAt.as_str() {
                raw.pending_fallback_at = Self::parse_slot(StatusKey::PendingFallbackAt, &value);
            } else if k == StatusKey::ProductsProcessed.as_str() {
                raw.products_processed = Self::parse_slot(StatusKey::ProductsProcessed, &value);
            } else if k == StatusKey::ProductsDeleted.as_str() {
                raw.products_deleted = Self::parse_slot(StatusKey::ProductsDeleted, &value);
            }
        }
        Ok(raw)
    }

    fn save_run_state(&self, state: &RunState) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        match state {
            RunState::Idle => {
                Self::upsert_slot(&tx, StatusKey::StartedAt, "0")?;
                Self::remove_slot(&tx, StatusKey::LastResultCount)?;
                Self::remove_slot(&tx, StatusKey::TooManyCount)?;
                Self::remove_slot(&tx, StatusKey::PendingFallbackAt)?;
            }
            RunState::Running { started_at } => {
                Self::upsert_slot(&tx, StatusKey::StartedAt, &started_at.to_string())?;
                Self::remove_slot(&tx, StatusKey::LastResultCount)?;
                Self::remove_slot(&tx, StatusKey::TooManyCount)?;
                Self::remove_slot(&tx, StatusKey::PendingFallbackAt)?;
                Self::upsert_slot(&tx, StatusKey::ProductsProcessed, "0")?;
                Self::upsert_slot(&tx, StatusKey::ProductsDeleted, "0")?;
            }
            RunState::Completed { deleted } => {
                Self::upsert_slot(&tx, StatusKey::StartedAt, "0")?;
                Self::upsert_slot(&tx, StatusKey::LastResultCount, &deleted.to_string())?;
                Self::remove_slot(&tx, StatusKey::TooManyCount)?;
                Self::remove_slot(&tx, StatusKey::PendingFallbackAt)?;
            }
            RunState::TooMany { eligible } => {
                Self::upsert_slot(&tx, StatusKey::StartedAt, "0")?;
                Self::upsert_slot(&tx, StatusKey::TooManyCount, &eligible.to_string())?;
                Self::remove_slot(&tx, StatusKey::LastResultCount)?;
                Self::remove_slot(&tx, StatusKey::PendingFallbackAt)?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "INSERT INTO job_runs (job_id, started_at, status, triggered_by)
             VALUES (?1, ?2, ?3, ?4)",
            params![job_id, now, JobRunStatus::Running.as_str(), triggered_by],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "UPDATE job_runs SET finished_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![now, status.as_str(), error_message, run_id],
        )?;

        Ok(())
    }

    fn get_running_jobs(&self) -> Result<Vec<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, started_at, finished_at, status, error_message, triggered_by
             FROM job_runs WHERE status = ?1 ORDER BY started_at DESC",
        )?;

        let jobs = stmt
            .query_map(
                params![JobRunStatus::Running.as_str()],
                Self::row_to_job_run,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(jobs)
    }

    fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, started_at, finished_at, status, error_message, triggered_by
             FROM job_runs WHERE job_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;

        let jobs = stmt
            .query_map(params![job_id, limit as i64], Self::row_to_job_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(jobs)
    }

    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                "SELECT id, job_id, started_at, finished_at, status, error_message, triggered_by
                 FROM job_runs WHERE job_id = ?1 ORDER BY id DESC LIMIT 1",
                params![job_id],
                Self::row_to_job_run,
            )
            .optional()?;

        Ok(job)
    }

    fn mark_stale_jobs_failed(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        let count = conn.execute(
            "UPDATE job_runs SET status = ?1, finished_at = ?2, error_message = ?3
             WHERE status = ?4",
            params![
                JobRunStatus::Failed.as_str(),
                now,
                "Job was interrupted (process restart)",
                JobRunStatus::Running.as_str()
            ],
        )?;

        Ok(count)
    }

    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>> {
        let conn = self.conn.lock().unwrap();
        let state = conn
            .query_row(
                "SELECT job_id, next_run_at, last_run_at FROM job_schedules WHERE job_id = ?1",
                params![job_id],
                Self::row_to_schedule_state,
            )
            .optional()?;

        Ok(state)
    }

    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let next_run_at = Self::format_datetime(&state.next_run_at);
        let last_run_at = state.last_run_at.as_ref().map(Self::format_datetime);

        conn.execute(
            "INSERT INTO job_schedules (job_id, next_run_at, last_run_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET next_run_at = ?2, last_run_at = ?3",
            params![state.job_id, next_run_at, last_run_at],
        )?;

        Ok(())
    }

    fn delete_schedule_state(&self, job_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM job_schedules WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(())
    }

    fn record_deleted_item(&self, record: &DeletedRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO deleted_items (slug, url, deleted_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(slug) DO UPDATE SET url = ?2, deleted_at = ?3",
            params![record.slug, record.url, record.deleted_at],
        )?;
        Ok(())
    }

    fn find_deleted_item(&self, slug: &str) -> Result<Option<DeletedRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT slug, url, deleted_at FROM deleted_items WHERE slug = ?1",
                params![slug],
                Self::row_to_deleted_record,
            )
            .optional()?;
        Ok(record)
    }

    fn prune_deleted_items(&self, before_timestamp: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM deleted_items WHERE deleted_at < ?1",
            params![before_timestamp],
        )?;
        Ok(deleted)
    }
}

impl RunLogSink for SqliteStatusStore {
    fn write_line(&self, line: &str) -> Result<()> {
        self.write_line_at(Utc::now().timestamp(), line)
    }

    fn read_recent(&self, limit: usize) -> Result<Vec<RunLogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, line FROM run_log ORDER BY id DESC LIMIT ?1",
        )?;
        let mut entries = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RunLogEntry {
                    id: row.get("id")?,
                    timestamp: row.get("timestamp")?,
                    line: row.get("line")?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        entries.reverse();
        Ok(entries)
    }

    fn has_content(&self) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn.query_row("SELECT EXISTS(SELECT 1 FROM run_log)", [], |row| {
            row.get(0)
        })?;
        Ok(exists)
    }

    fn prune_older_than(&self, before_timestamp: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM run_log WHERE timestamp < ?1",
            params![before_timestamp],
        )?;
        Ok(deleted)
    }
}
