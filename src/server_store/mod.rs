mod models;
mod schema;
mod sqlite_server_store;

pub use models::*;
pub use schema::SERVER_VERSIONED_SCHEMAS;
pub use sqlite_server_store::SqliteServerStore;

use anyhow::Result;
use chrono::{DateTime, Utc};

pub trait ServerStore: Send + Sync {
    // Run log
    fn record_run_start(&self, task_name: &str, triggered_by: &str, worker_id: &str)
        -> Result<i64>;
    /// Finalize a started run. Fails if the run is unknown or already final.
    fn record_run_finish(
        &self,
        run_id: i64,
        status: RunStatus,
        duration_ms: i64,
        error_message: Option<&str>,
    ) -> Result<()>;
    fn get_run(&self, run_id: i64) -> Result<Option<SyncJobRun>>;
    fn get_runs(&self, query: &RunQuery) -> Result<Vec<SyncJobRun>>;
    fn get_run_stats(&self, since: Option<DateTime<Utc>>) -> Result<Vec<TaskRunStats>>;
    fn get_recent_failures(&self, limit: usize) -> Result<Vec<SyncJobRun>>;
    fn get_last_run(&self, task_name: &str) -> Result<Option<SyncJobRun>>;
    fn mark_stale_runs_failed(&self) -> Result<usize>;

    // Schedule state
    fn get_schedule_state(&self, job_id: &str) -> Result<Option<JobScheduleState>>;
    fn update_schedule_state(&self, state: &JobScheduleState) -> Result<()>;

    // Key-value state storage
    fn get_state(&self, key: &str) -> Result<Option<String>>;
    fn set_state(&self, key: &str, value: &str) -> Result<()>;
    fn delete_state(&self, key: &str) -> Result<()>;

    // Job audit log
    fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64>;
    fn get_job_audit_log_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>>;
}
