use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Run status slots
// =============================================================================

/// Named slots of the persisted run status.
///
/// The store is a plain key/value table; these are the only keys the
/// coordinator and the status API ever touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKey {
    StartedAt,
    LastResultCount,
    TooManyCount,
    LastScheduledRunAt,
    PendingFallbackAt,
    ProductsProcessed,
    ProductsDeleted,
    Settings,
}

impl StatusKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKey::StartedAt => "cleanup_started_at",
            StatusKey::LastResultCount => "cleanup_last_result_count",
            StatusKey::TooManyCount => "cleanup_too_many_count",
            StatusKey::LastScheduledRunAt => "cleanup_last_scheduled_run_at",
            StatusKey::PendingFallbackAt => "cleanup_pending_fallback_at",
            StatusKey::ProductsProcessed => "cleanup_products_processed",
            StatusKey::ProductsDeleted => "cleanup_products_deleted",
            StatusKey::Settings => "cleanup_settings",
        }
    }
}

/// Raw values of the run status slots, as stored.
///
/// Consumers should not interpret these directly; use
/// [`RunState::from_raw`](super::RunState::from_raw).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRunStatus {
    pub started_at: Option<i64>,
    pub last_result_count: Option<u64>,
    pub too_many_count: Option<u64>,
    pub last_scheduled_run_at: Option<i64>,
    pub pending_fallback_at: Option<i64>,
    pub products_processed: Option<u64>,
    pub products_deleted: Option<u64>,
}

// =============================================================================
// Job runs (scheduler bookkeeping)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobRunStatus::Running),
            "completed" => Some(JobRunStatus::Completed),
            "failed" => Some(JobRunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRun {
    pub id: i64,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    /// How the job was triggered: "schedule", "manual", "dispatch", "hook:OnStartup".
    pub triggered_by: String,
}

#[derive(Debug, Clone)]
pub struct JobScheduleState {
    pub job_id: String,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Run log
// =============================================================================

/// One line of the operator-visible cleanup log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub id: i64,
    /// Unix timestamp when the line was written.
    pub timestamp: i64,
    pub line: String,
}

// =============================================================================
// Gone tracking
// =============================================================================

/// Identity of a deleted catalog item, kept so that later requests for it can
/// be answered with "410 Gone" instead of "404 Not Found".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRecord {
    pub slug: String,
    pub url: String,
    /// Unix timestamp of the deletion.
    pub deleted_at: i64,
}
