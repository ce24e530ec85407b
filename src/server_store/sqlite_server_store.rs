use super::models::{
    JobAuditEntry, JobAuditEventType, JobScheduleState, RunQuery, RunStatus, SyncJobRun,
    TaskRunStats,
};
use super::schema::SERVER_VERSIONED_SCHEMAS;
use super::ServerStore;
use crate::sqlite_persistence::open_versioned;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

const RUN_COLUMNS: &str = "id, task_name, status, started_at, completed_at, duration_ms, \
                           error_message, worker_id, triggered_by";

pub struct SqliteServerStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteServerStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open server database at {:?}", path))?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        open_versioned(&mut conn, SERVER_VERSIONED_SCHEMAS, "server")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<SyncJobRun> {
        let status_str: String = row.get("status")?;
        let started_at_str: String = row.get("started_at")?;
        let completed_at_str: Option<String> = row.get("completed_at")?;

        Ok(SyncJobRun {
            id: row.get("id")?,
            task_name: row.get("task_name")?,
            status: RunStatus::parse(&status_str).unwrap_or(RunStatus::Failed),
            started_at: Self::parse_datetime(&started_at_str).unwrap_or_else(Utc::now),
            completed_at: completed_at_str.as_deref().and_then(Self::parse_datetime),
            duration_ms: row.get("duration_ms")?,
            error_message: row.get("error_message")?,
            worker_id: row.get("worker_id")?,
            triggered_by: row.get("triggered_by")?,
        })
    }

    fn row_to_schedule_state(row: &rusqlite::Row) -> rusqlite::Result<JobScheduleState> {
        let next_run_at_str: String = row.get("next_run_at")?;
        let last_run_at_str: Option<String> = row.get("last_run_at")?;

        Ok(JobScheduleState {
            job_id: row.get("job_id")?,
            next_run_at: Self::parse_datetime(&next_run_at_str).unwrap_or_else(Utc::now),
            last_run_at: last_run_at_str.as_deref().and_then(Self::parse_datetime),
        })
    }

    fn row_to_audit_entry(row: &rusqlite::Row) -> rusqlite::Result<JobAuditEntry> {
        let event_type_str: String = row.get("event_type")?;
        let timestamp_str: String = row.get("timestamp")?;
        let details_str: Option<String> = row.get("details")?;

        Ok(JobAuditEntry {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            event_type: JobAuditEventType::parse(&event_type_str)
                .unwrap_or(JobAuditEventType::Progress),
            timestamp: Self::parse_datetime(&timestamp_str)
                .map(|dt| dt.timestamp())
                .unwrap_or_else(|| Utc::now().timestamp()),
            duration_ms: row.get("duration_ms")?,
            details: details_str.and_then(|s| serde_json::from_str(&s).ok()),
            error: row.get("error")?,
        })
    }
}

impl ServerStore for SqliteServerStore {
    fn record_run_start(
        &self,
        task_name: &str,
        triggered_by: &str,
        worker_id: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "INSERT INTO sync_job_runs (task_name, status, started_at, worker_id, triggered_by)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task_name,
                RunStatus::Started.as_str(),
                now,
                worker_id,
                triggered_by
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn record_run_finish(
        &self,
        run_id: i64,
        status: RunStatus,
        duration_ms: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        if status == RunStatus::Started {
            bail!("Run {} cannot be finalized as started", run_id);
        }

        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        let updated = conn.execute(
            "UPDATE sync_job_runs
             SET status = ?1, completed_at = ?2, duration_ms = ?3, error_message = ?4
             WHERE id = ?5 AND status = ?6",
            params![
                status.as_str(),
                now,
                duration_ms,
                error_message,
                run_id,
                RunStatus::Started.as_str()
            ],
        )?;

        if updated == 0 {
            bail!("Run {} is unknown or already finalized", run_id);
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> Result<Option<SyncJobRun>> {
        let conn = self.conn.lock().unwrap();
        let run = conn
            .query_row(
                &format!("SELECT {} FROM sync_job_runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                Self::row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    fn get_runs(&self, query: &RunQuery) -> Result<Vec<SyncJobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sync_job_runs
             WHERE (?1 IS NULL OR task_name = ?1)
               AND (?2 IS NULL OR status = ?2)
               AND (?3 IS NULL OR started_at >= ?3)
               AND (?4 IS NULL OR started_at < ?4)
             ORDER BY started_at DESC, id DESC
             LIMIT ?5",
            RUN_COLUMNS
        ))?;

        let runs = stmt
            .query_map(
                params![
                    query.task,
                    query.status.map(|s| s.as_str()),
                    query.since.as_ref().map(Self::format_datetime),
                    query.until.as_ref().map(Self::format_datetime),
                    query.limit as i64
                ],
                Self::row_to_run,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(runs)
    }

    fn get_run_stats(&self, since: Option<DateTime<Utc>>) -> Result<Vec<TaskRunStats>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT task_name,
                    COUNT(*),
                    SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN status = 'started' THEN 1 ELSE 0 END),
                    AVG(duration_ms),
                    MAX(duration_ms)
             FROM sync_job_runs
             WHERE (?1 IS NULL OR started_at >= ?1)
             GROUP BY task_name
             ORDER BY task_name",
        )?;

        let stats = stmt
            .query_map(params![since.as_ref().map(Self::format_datetime)], |row| {
                Ok(TaskRunStats {
                    task_name: row.get(0)?,
                    total: row.get::<_, i64>(1)? as usize,
                    completed: row.get::<_, i64>(2)? as usize,
                    failed: row.get::<_, i64>(3)? as usize,
                    running: row.get::<_, i64>(4)? as usize,
                    avg_duration_ms: row.get(5)?,
                    max_duration_ms: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(stats)
    }

    fn get_recent_failures(&self, limit: usize) -> Result<Vec<SyncJobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sync_job_runs WHERE status = ?1
             ORDER BY completed_at DESC, id DESC LIMIT ?2",
            RUN_COLUMNS
        ))?;

        let runs = stmt
            .query_map(
                params![RunStatus::Failed.as_str(), limit as i64],
                Self::row_to_run,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(runs)
    }

    fn get_last_run(&self, task_name: &str) -> Result<Option<SyncJobRun>> {
        let conn = self.conn.lock().unwrap();
        let run = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sync_job_runs WHERE task_name = ?1
                     ORDER BY started_at DESC, id DESC LIMIT 1",
                    RUN_COLUMNS
                ),
                params![task_name],
                Self::row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    fn mark_stale_runs_failed(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        // Runs still "started" at boot were interrupted by a crash or restart.
        let count = conn.execute(
            "UPDATE sync_job_runs SET status = ?1, completed_at = ?2, error_message = ?3
             WHERE status = ?4",
            params![
                RunStatus::Failed.as_str(),
                now,
                "Run was interrupted (process restart)",
                RunStatus::Started.as_str()
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
             ON CONFLICT(job_id) DO UPDATE SET next_run_at = ?2,
                 last_run_at = COALESCE(?3, last_run_at)",
            params![state.job_id, next_run_at, last_run_at],
        )?;

        Ok(())
    }

    fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM server_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());

        conn.execute(
            "INSERT INTO server_state (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value, now],
        )?;

        Ok(())
    }

    fn delete_state(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM server_state WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn log_job_audit(
        &self,
        job_id: &str,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let now = Self::format_datetime(&Utc::now());
        let details_str = details.map(|d| d.to_string());

        conn.execute(
            "INSERT INTO job_audit_log (job_id, event_type, timestamp, duration_ms, details, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job_id,
                event_type.as_str(),
                now,
                duration_ms,
                details_str,
                error
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn get_job_audit_log_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, event_type, timestamp, duration_ms, details, error
             FROM job_audit_log
             WHERE job_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let entries = stmt
            .query_map(
                params![job_id, limit as i64, offset as i64],
                Self::row_to_audit_entry,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    struct TestStore {
        store: SqliteServerStore,
        _temp_dir: TempDir, // Keep temp dir alive
    }

    fn create_test_store() -> TestStore {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("server.db");
        let store = SqliteServerStore::new(&db_path).unwrap();
        TestStore {
            store,
            _temp_dir: temp_dir,
        }
    }

    #[test]
    fn test_record_run_start_and_finish() {
        let test = create_test_store();
        let store = &test.store;

        let run_id = store
            .record_run_start("band_catalog_sync", "manual", "w/slot-0")
            .unwrap();
        assert!(run_id > 0);

        let run = store.get_run(run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Started);
        assert_eq!(run.worker_id, "w/slot-0");
        assert!(run.completed_at.is_none());

        store
            .record_run_finish(run_id, RunStatus::Completed, 1234, None)
            .unwrap();

        let run = store.get_run(run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.duration_ms, Some(1234));
        assert!(run.completed_at.is_some());
        assert!(run.error_message.is_none());
    }

    #[test]
    fn test_run_finalized_only_once() {
        let test = create_test_store();
        let store = &test.store;

        let run_id = store.record_run_start("task", "schedule", "w").unwrap();
        store
            .record_run_finish(run_id, RunStatus::Failed, 10, Some("boom"))
            .unwrap();

        let err = store
            .record_run_finish(run_id, RunStatus::Completed, 20, None)
            .unwrap_err();
        assert!(err.to_string().contains("already finalized"));

        let run = store.get_run(run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("boom"));
        assert_eq!(run.duration_ms, Some(10));
    }

    #[test]
    fn test_finish_rejects_started_status_and_unknown_run() {
        let test = create_test_store();
        let store = &test.store;

        let run_id = store.record_run_start("task", "schedule", "w").unwrap();
        assert!(store
            .record_run_finish(run_id, RunStatus::Started, 0, None)
            .is_err());
        assert!(store
            .record_run_finish(9999, RunStatus::Completed, 0, None)
            .is_err());
    }

    #[test]
    fn test_get_runs_filters() {
        let test = create_test_store();
        let store = &test.store;

        for i in 0..3 {
            let id = store.record_run_start("a", "schedule", "w").unwrap();
            let status = if i == 1 {
                RunStatus::Failed
            } else {
                RunStatus::Completed
            };
            store.record_run_finish(id, status, 5, None).unwrap();
        }
        store.record_run_start("b", "manual", "w").unwrap();

        let all = store.get_runs(&RunQuery::default()).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].task_name, "b");

        let only_a = store
            .get_runs(&RunQuery {
                task: Some("a".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(only_a.len(), 3);

        let failed = store
            .get_runs(&RunQuery {
                status: Some(RunStatus::Failed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(failed.len(), 1);

        let limited = store
            .get_runs(&RunQuery {
                limit: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 2);

        let future = store
            .get_runs(&RunQuery {
                since: Some(Utc::now() + Duration::hours(1)),
                ..Default::default()
            })
            .unwrap();
        assert!(future.is_empty());

        let past = store
            .get_runs(&RunQuery {
                until: Some(Utc::now() - Duration::hours(1)),
                ..Default::default()
            })
            .unwrap();
        assert!(past.is_empty());
    }

    #[test]
    fn test_run_stats() {
        let test = create_test_store();
        let store = &test.store;

        let a1 = store.record_run_start("a", "schedule", "w").unwrap();
        store
            .record_run_finish(a1, RunStatus::Completed, 100, None)
            .unwrap();
        let a2 = store.record_run_start("a", "schedule", "w").unwrap();
        store
            .record_run_finish(a2, RunStatus::Failed, 300, Some("x"))
            .unwrap();
        store.record_run_start("b", "schedule", "w").unwrap();

        let stats = store.get_run_stats(None).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(
            stats[0],
            TaskRunStats {
                task_name: "a".to_string(),
                total: 2,
                completed: 1,
                failed: 1,
                running: 0,
                avg_duration_ms: Some(200.0),
                max_duration_ms: Some(300),
            }
        );
        assert_eq!(stats[1].running, 1);
        assert_eq!(stats[1].avg_duration_ms, None);

        let none = store
            .get_run_stats(Some(Utc::now() + Duration::hours(1)))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_recent_failures() {
        let test = create_test_store();
        let store = &test.store;

        for i in 0..4 {
            let id = store.record_run_start("a", "schedule", "w").unwrap();
            store
                .record_run_finish(id, RunStatus::Failed, 1, Some(&format!("err {}", i)))
                .unwrap();
        }
        let ok = store.record_run_start("a", "schedule", "w").unwrap();
        store
            .record_run_finish(ok, RunStatus::Completed, 1, None)
            .unwrap();

        let failures = store.get_recent_failures(3).unwrap();
        assert_eq!(failures.len(), 3);
        assert!(failures.iter().all(|r| r.status == RunStatus::Failed));
        assert_eq!(failures[0].error_message.as_deref(), Some("err 3"));
    }

    #[test]
    fn test_mark_stale_runs_failed() {
        let test = create_test_store();
        let store = &test.store;

        store.record_run_start("stale_1", "schedule", "w").unwrap();
        store
            .record_run_start("stale_2", "hook:OnStartup", "w")
            .unwrap();

        let count = store.mark_stale_runs_failed().unwrap();
        assert_eq!(count, 2);

        let last_run = store.get_last_run("stale_1").unwrap().unwrap();
        assert_eq!(last_run.status, RunStatus::Failed);
        assert!(last_run.error_message.unwrap().contains("interrupted"));
        assert_eq!(store.mark_stale_runs_failed().unwrap(), 0);
    }

    #[test]
    fn test_get_last_run_nonexistent_task() {
        let test = create_test_store();
        assert!(test.store.get_last_run("nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_schedule_state_keeps_last_run() {
        let test = create_test_store();
        let store = &test.store;

        assert!(store.get_schedule_state("job").unwrap().is_none());

        let last = Utc::now();
        store
            .update_schedule_state(&JobScheduleState {
                job_id: "job".to_string(),
                next_run_at: last + Duration::hours(1),
                last_run_at: Some(last),
            })
            .unwrap();
        store
            .update_schedule_state(&JobScheduleState {
                job_id: "job".to_string(),
                next_run_at: last + Duration::hours(2),
                last_run_at: None,
            })
            .unwrap();

        let state = store.get_schedule_state("job").unwrap().unwrap();
        assert!(state.last_run_at.is_some());
        assert!(state.next_run_at > last + Duration::minutes(90));
    }

    #[test]
    fn test_state_set_update_delete() {
        let test = create_test_store();
        let store = &test.store;

        assert!(store.get_state("key").unwrap().is_none());
        store.set_state("key", "value1").unwrap();
        store.set_state("key", "value2").unwrap();
        assert_eq!(store.get_state("key").unwrap(), Some("value2".to_string()));

        store.delete_state("key").unwrap();
        assert!(store.get_state("key").unwrap().is_none());
    }

    #[test]
    fn test_audit_log_by_job() {
        let test = create_test_store();
        let store = &test.store;

        store
            .log_job_audit("a", JobAuditEventType::Started, None, None, None)
            .unwrap();
        let details = serde_json::json!({"partition": "A", "inserted": 3});
        store
            .log_job_audit("a", JobAuditEventType::Progress, None, Some(&details), None)
            .unwrap();
        store
            .log_job_audit("b", JobAuditEventType::Failed, Some(5), None, Some("err"))
            .unwrap();

        let entries = store.get_job_audit_log_by_job("a", 10, 0).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event_type, JobAuditEventType::Progress);
        assert_eq!(entries[0].details, Some(details));

        let paged = store.get_job_audit_log_by_job("a", 1, 1).unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].event_type, JobAuditEventType::Started);
    }
}
