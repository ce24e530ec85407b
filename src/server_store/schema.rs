//! SQLite schema definitions for the server database.
//!
//! This module defines the database schema for the sync run log, job
//! schedules, key/value server state and the job audit log.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Run log and schedules
// =============================================================================

/// Append-only history of sync job runs
const SYNC_JOB_RUNS_TABLE_V1: Table = Table {
    name: "sync_job_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("task_name", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("completed_at", &SqlType::Text),
        sqlite_column!("duration_ms", &SqlType::Integer),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("worker_id", &SqlType::Text, non_null = true),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_sync_job_runs_task_started", "task_name, started_at DESC"),
        ("idx_sync_job_runs_status", "status"),
        ("idx_sync_job_runs_started", "started_at"),
    ],
    unique_constraints: &[],
};

/// Next fire time for cron and interval jobs
const JOB_SCHEDULES_TABLE_V1: Table = Table {
    name: "job_schedules",
    columns: &[
        sqlite_column!("job_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("next_run_at", &SqlType::Text, non_null = true),
        sqlite_column!("last_run_at", &SqlType::Text),
    ],
    indices: &[],
    unique_constraints: &[],
};

// =============================================================================
// Version 2 - Server state key-value store
// =============================================================================

/// Holds sync checkpoints among other small values
const SERVER_STATE_TABLE_V2: Table = Table {
    name: "server_state",
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
    unique_constraints: &[],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    SERVER_STATE_TABLE_V2.create(conn)
}

// =============================================================================
// Version 3 - Job audit log
// =============================================================================

const JOB_AUDIT_LOG_TABLE_V3: Table = Table {
    name: "job_audit_log",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("event_type", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Text, non_null = true),
        sqlite_column!("duration_ms", &SqlType::Integer),
        sqlite_column!("details", &SqlType::Text),
        sqlite_column!("error", &SqlType::Text),
    ],
    indices: &[
        ("idx_job_audit_log_job_id", "job_id"),
        ("idx_job_audit_log_timestamp", "timestamp DESC"),
    ],
    unique_constraints: &[],
};

fn migrate_v2_to_v3(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    JOB_AUDIT_LOG_TABLE_V3.create(conn)
}

/// Version 1: sync_job_runs, job_schedules
/// Version 2: server_state
/// Version 3: job_audit_log
pub const SERVER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[SYNC_JOB_RUNS_TABLE_V1, JOB_SCHEDULES_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            SYNC_JOB_RUNS_TABLE_V1,
            JOB_SCHEDULES_TABLE_V1,
            SERVER_STATE_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
    VersionedSchema {
        version: 3,
        tables: &[
            SYNC_JOB_RUNS_TABLE_V1,
            JOB_SCHEDULES_TABLE_V1,
            SERVER_STATE_TABLE_V2,
            JOB_AUDIT_LOG_TABLE_V3,
        ],
        migration: Some(migrate_v2_to_v3),
    },
];
