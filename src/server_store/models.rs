use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a sync job run. A run is created `Started` and finalized
/// exactly once to `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(RunStatus::Started),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// One row of the append-only run log.
#[derive(Debug, Clone, Serialize)]
pub struct SyncJobRun {
    pub id: i64,
    pub task_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub worker_id: String,
    /// How the run was triggered: "schedule", "manual", "hook:OnStartup".
    pub triggered_by: String,
}

/// Filter for run history queries. Every field is optional except `limit`.
#[derive(Debug, Clone)]
pub struct RunQuery {
    pub task: Option<String>,
    pub status: Option<RunStatus>,
    /// Inclusive lower bound on `started_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `started_at`.
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for RunQuery {
    fn default() -> Self {
        Self {
            task: None,
            status: None,
            since: None,
            until: None,
            limit: 100,
        }
    }
}

/// Aggregate run statistics for one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRunStats {
    pub task_name: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
    pub avg_duration_ms: Option<f64>,
    pub max_duration_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct JobScheduleState {
    pub job_id: String,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Event types for job audit log entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAuditEventType {
    Started,
    Completed,
    Failed,
    Progress,
}

impl JobAuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAuditEventType::Started => "started",
            JobAuditEventType::Completed => "completed",
            JobAuditEventType::Failed => "failed",
            JobAuditEventType::Progress => "progress",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(JobAuditEventType::Started),
            "completed" => Some(JobAuditEventType::Completed),
            "failed" => Some(JobAuditEventType::Failed),
            "progress" => Some(JobAuditEventType::Progress),
            _ => None,
        }
    }
}

/// An entry in the job audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAuditEntry {
    pub id: i64,
    pub job_id: String,
    pub event_type: JobAuditEventType,
    /// Unix timestamp when the event occurred
    pub timestamp: i64,
    pub duration_ms: Option<i64>,
    pub details: Option<serde_json::Value>,
    pub error: Option<String>,
}
