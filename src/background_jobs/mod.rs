//! Background job scheduling and execution.
//!
//! Jobs run on a small worker pool, either on a cron schedule, on a hook or
//! on demand. Every run is recorded in the server store's run log.

mod audit_logger;
mod context;
mod cron;
mod handle;
mod job;
pub mod jobs;
mod scheduler;

pub use audit_logger::JobAuditLogger;
pub use context::JobContext;
pub use cron::CronSchedule;
pub use handle::{JobInfo, JobRunInfo, JobScheduleInfo, SchedulerHandle};
pub use job::{
    BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior, SCRAPE_EXCLUSIVITY_KEY,
};
pub use scheduler::{create_scheduler, JobScheduler};
