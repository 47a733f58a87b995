//! SQLite schema definitions for the status database.
//!
//! The status database holds the cleanup run state, background job
//! bookkeeping, the operator-visible run log and the deleted-item records
//! used for "410 Gone" responses.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Run state and job bookkeeping
// =============================================================================

/// Key-value slots of the cleanup run status
const RUN_STATE_TABLE_V1: Table = Table {
    name: "run_state",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
        sqlite_column!(
            "updated_at",
            &SqlType::Text,
            non_null = true,
            default_value = Some("(datetime('now'))")
        ),
    ],
    indices: &[],
};

const JOB_RUNS_TABLE_V1: Table = Table {
    name: "job_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("finished_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_job_runs_job_id_started", "job_id, started_at DESC"),
        ("idx_job_runs_status", "status"),
    ],
};

const JOB_SCHEDULES_TABLE_V1: Table = Table {
    name: "job_schedules",
    columns: &[
        sqlite_column!("job_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("next_run_at", &SqlType::Text, non_null = true),
        sqlite_column!("last_run_at", &SqlType::Text),
    ],
    indices: &[],
};

// =============================================================================
// Version 2 - Run log and deleted items
// =============================================================================

/// Append-only log of cleanup activity shown to operators
const RUN_LOG_TABLE_V2: Table = Table {
    name: "run_log",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
        sqlite_column!("line", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_run_log_timestamp", "timestamp")],
};

/// Deleted catalog items, keyed by slug
const DELETED_ITEMS_TABLE_V2: Table = Table {
    name: "deleted_items",
    columns: &[
        sqlite_column!("slug", &SqlType::Text, is_primary_key = true),
        sqlite_column!("url", &SqlType::Text, non_null = true),
        sqlite_column!("deleted_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_deleted_items_deleted_at", "deleted_at")],
};

/// Migration from version 1 to version 2: add run_log and deleted_items
fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    RUN_LOG_TABLE_V2.create(conn)?;
    DELETED_ITEMS_TABLE_V2.create(conn)?;
    Ok(())
}

// =============================================================================
// Versioned Schema Definition
// =============================================================================

pub const STATUS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[RUN_STATE_TABLE_V1, JOB_RUNS_TABLE_V1, JOB_SCHEDULES_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            RUN_STATE_TABLE_V1,
            JOB_RUNS_TABLE_V1,
            JOB_SCHEDULES_TABLE_V1,
            RUN_LOG_TABLE_V2,
            DELETED_ITEMS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
