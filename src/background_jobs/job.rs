use super::context::JobContext;
use async_trait::async_trait;
use std::time::Duration;

/// Exclusivity key shared by every job that talks to the upstream catalog.
pub const SCRAPE_EXCLUSIVITY_KEY: &str = "scrape";

/// Schedule for when a job should run.
#[derive(Debug, Clone, PartialEq)]
pub enum JobSchedule {
    /// Five-field cron expression, evaluated in UTC
    Cron(String),
    /// Run at fixed intervals
    Interval(Duration),
    /// Run only in response to hooks
    Hook(HookEvent),
    /// Run only when triggered on demand
    Manual,
}

/// Events that can trigger hook-based jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    OnStartup,
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookEvent::OnStartup => write!(f, "OnStartup"),
        }
    }
}

/// How a job should be handled during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownBehavior {
    /// Job can be cancelled immediately
    #[default]
    Cancellable,
    /// Wait for job to complete before shutdown
    WaitForCompletion,
}

/// Errors that can occur during job execution.
#[derive(Debug)]
pub enum JobError {
    NotFound,
    AlreadyRunning,
    AlreadyQueued,
    ExecutionFailed(String),
    Cancelled,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::NotFound => write!(f, "Job not found"),
            JobError::AlreadyRunning => write!(f, "Job is already running"),
            JobError::AlreadyQueued => write!(f, "Job is already queued"),
            JobError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
            JobError::Cancelled => write!(f, "Job was cancelled"),
        }
    }
}

impl std::error::Error for JobError {}

/// Trait for background jobs.
///
/// Jobs run on the scheduler's worker pool. Long-running work should check
/// `ctx.is_cancelled()` at safe points and return `JobError::Cancelled`.
#[async_trait]
pub trait BackgroundJob: Send + Sync {
    /// Unique identifier for this job. Also the task name in the run log.
    fn id(&self) -> &str;

    /// Human-readable name for this job.
    fn name(&self) -> &str;

    /// Description of what this job does.
    fn description(&self) -> &str;

    /// When this job should be scheduled to run.
    fn schedule(&self) -> JobSchedule;

    /// Jobs sharing a key never run at the same time.
    fn exclusivity_key(&self) -> Option<&'static str> {
        None
    }

    /// How this job should be handled during shutdown.
    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}
