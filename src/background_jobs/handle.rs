use super::job::{BackgroundJob, JobError, JobSchedule};
use crate::server_store::{JobAuditEntry, RunQuery, ServerStore, SyncJobRun};
use anyhow::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Information about a registered job for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: JobScheduleInfo,
    pub exclusivity_key: Option<String>,
    pub is_running: bool,
    pub is_queued: bool,
    pub last_run: Option<JobRunInfo>,
    pub next_run_at: Option<String>,
}

/// Serializable schedule information.
#[derive(Debug, Clone, Serialize)]
pub struct JobScheduleInfo {
    #[serde(rename = "type")]
    pub schedule_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
}

impl From<JobSchedule> for JobScheduleInfo {
    fn from(schedule: JobSchedule) -> Self {
        let info = JobScheduleInfo {
            schedule_type: String::new(),
            value_secs: None,
            cron: None,
            hook: None,
        };
        match schedule {
            JobSchedule::Cron(expr) => JobScheduleInfo {
                schedule_type: "cron".to_string(),
                cron: Some(expr),
                ..info
            },
            JobSchedule::Interval(duration) => JobScheduleInfo {
                schedule_type: "interval".to_string(),
                value_secs: Some(duration.as_secs()),
                ..info
            },
            JobSchedule::Hook(event) => JobScheduleInfo {
                schedule_type: "hook".to_string(),
                hook: Some(event.to_string()),
                ..info
            },
            JobSchedule::Manual => JobScheduleInfo {
                schedule_type: "manual".to_string(),
                ..info
            },
        }
    }
}

/// Serializable job run information.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub id: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub status: String,
    pub error_message: Option<String>,
    pub triggered_by: String,
    pub worker_id: String,
}

impl From<SyncJobRun> for JobRunInfo {
    fn from(run: SyncJobRun) -> Self {
        JobRunInfo {
            id: run.id,
            started_at: run.started_at.to_rfc3339(),
            completed_at: run.completed_at.map(|dt| dt.to_rfc3339()),
            duration_ms: run.duration_ms,
            status: run.status.as_str().to_string(),
            error_message: run.error_message,
            triggered_by: run.triggered_by,
            worker_id: run.worker_id,
        }
    }
}

/// Command sent to the scheduler.
pub enum SchedulerCommand {
    TriggerJob {
        job_id: String,
        response: oneshot::Sender<Result<(), JobError>>,
    },
}

/// Shared state between scheduler and handle.
#[derive(Default)]
pub struct SharedJobState {
    /// Static job info (set at registration, never changes)
    pub jobs: HashMap<String, Arc<dyn BackgroundJob>>,
    /// Currently running job IDs
    pub running_jobs: HashSet<String>,
    /// Job IDs waiting for a free slot
    pub queued_jobs: HashSet<String>,
}

/// Handle to interact with the job scheduler from HTTP handlers.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    shared_state: Arc<RwLock<SharedJobState>>,
    server_store: Arc<dyn ServerStore>,
}

impl SchedulerHandle {
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        shared_state: Arc<RwLock<SharedJobState>>,
        server_store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            command_tx,
            shared_state,
            server_store,
        }
    }

    fn job_info(&self, state: &SharedJobState, job: &Arc<dyn BackgroundJob>) -> Result<JobInfo> {
        let job_id = job.id();
        let last_run = self
            .server_store
            .get_last_run(job_id)?
            .map(JobRunInfo::from);
        let next_run_at = self
            .server_store
            .get_schedule_state(job_id)?
            .map(|s| s.next_run_at.to_rfc3339());

        Ok(JobInfo {
            id: job_id.to_string(),
            name: job.name().to_string(),
            description: job.description().to_string(),
            schedule: job.schedule().into(),
            exclusivity_key: job.exclusivity_key().map(str::to_string),
            is_running: state.running_jobs.contains(job_id),
            is_queued: state.queued_jobs.contains(job_id),
            last_run,
            next_run_at,
        })
    }

    /// Get information about all registered jobs, sorted by id.
    pub async fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        let state = self.shared_state.read().await;
        let mut jobs = state
            .jobs
            .values()
            .map(|job| self.job_info(&state, job))
            .collect::<Result<Vec<_>>>()?;
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>> {
        let state = self.shared_state.read().await;
        match state.jobs.get(job_id) {
            Some(job) => Ok(Some(self.job_info(&state, job)?)),
            None => Ok(None),
        }
    }

    /// Queue a job for an on-demand run.
    pub async fn trigger_job(&self, job_id: &str) -> Result<(), JobError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::TriggerJob {
                job_id: job_id.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler not available".to_string()))?;

        response_rx
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler did not respond".to_string()))?
    }

    /// Most recent runs of a job, newest first.
    pub fn get_job_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRunInfo>> {
        let runs = self.server_store.get_runs(&RunQuery {
            task: Some(job_id.to_string()),
            limit,
            ..Default::default()
        })?;
        Ok(runs.into_iter().map(JobRunInfo::from).collect())
    }

    pub async fn is_job_running(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.running_jobs.contains(job_id)
    }

    pub async fn is_job_queued(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.queued_jobs.contains(job_id)
    }

    pub async fn job_exists(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.jobs.contains_key(job_id)
    }

    pub fn get_job_audit_log_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<JobAuditEntry>> {
        self.server_store
            .get_job_audit_log_by_job(job_id, limit, offset)
    }
}
