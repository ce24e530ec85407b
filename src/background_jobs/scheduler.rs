//! Job scheduler with a fixed worker pool.
//!
//! Due, hooked and triggered jobs go to a FIFO pending queue. A queued job
//! starts once a worker slot is free and no running job shares its
//! exclusivity key. Jobs blocked on their key keep their place in the queue
//! while jobs behind them may start.

use super::audit_logger::JobAuditLogger;
use super::context::JobContext;
use super::cron::CronSchedule;
use super::handle::{SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
use crate::server::metrics;
use crate::server_store::{JobScheduleState, RunStatus, ServerStore};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const IDLE_WAIT: Duration = Duration::from_secs(60);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

struct PendingRun {
    job_id: String,
    triggered_by: String,
}

struct RunningJob {
    handle: JoinHandle<()>,
    slot: usize,
    exclusivity_key: Option<&'static str>,
}

/// Main job scheduler that manages background job execution.
pub struct JobScheduler {
    shared_state: Arc<RwLock<SharedJobState>>,
    /// Prefix of the worker ids of this scheduler instance.
    instance_id: Uuid,
    /// Job running on each worker slot.
    slots: Vec<Option<String>>,
    pending: VecDeque<PendingRun>,
    running: HashMap<String, RunningJob>,
    crons: HashMap<String, CronSchedule>,
    server_store: Arc<dyn ServerStore>,
    hook_receiver: mpsc::Receiver<HookEvent>,
    command_receiver: mpsc::Receiver<SchedulerCommand>,
    finished_tx: mpsc::UnboundedSender<String>,
    finished_rx: mpsc::UnboundedReceiver<String>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
}

impl JobScheduler {
    fn new(
        shared_state: Arc<RwLock<SharedJobState>>,
        server_store: Arc<dyn ServerStore>,
        hook_receiver: mpsc::Receiver<HookEvent>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        max_concurrent: usize,
    ) -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        Self {
            shared_state,
            instance_id: Uuid::new_v4(),
            slots: vec![None; max_concurrent.max(1)],
            pending: VecDeque::new(),
            running: HashMap::new(),
            crons: HashMap::new(),
            server_store,
            hook_receiver,
            command_receiver,
            finished_tx,
            finished_rx,
            shutdown_token,
            job_context,
        }
    }

    /// Register a job. Jobs with an invalid cron expression stay available
    /// for manual triggers only.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.name());

        if let JobSchedule::Cron(expr) = job.schedule() {
            match CronSchedule::parse(&expr) {
                Ok(cron) => {
                    self.crons.insert(job_id.clone(), cron);
                }
                Err(e) => error!("Job {} will only run on demand: {:#}", job_id, e),
            }
        }

        let mut state = self.shared_state.write().await;
        state.jobs.insert(job_id, job);
    }

    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    pub fn worker_count(&self) -> usize {
        self.slots.len()
    }

    /// Run the scheduler until the shutdown token is cancelled.
    pub async fn run(&mut self) {
        info!(
            "Job scheduler {} started with {} worker slot(s)",
            self.instance_id,
            self.slots.len()
        );

        match self.server_store.mark_stale_runs_failed() {
            Ok(0) => {}
            Ok(count) => warn!("Marked {} run(s) left over from a previous process as failed", count),
            Err(e) => error!("Failed to mark stale runs: {:#}", e),
        }

        self.trigger_jobs_for_hook(HookEvent::OnStartup).await;

        loop {
            self.enqueue_due_jobs().await;
            self.dispatch_pending().await;

            let wait = self.time_until_next_scheduled_job().await;

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                Some(event) = self.hook_receiver.recv() => {
                    debug!("Received hook event: {}", event);
                    self.trigger_jobs_for_hook(event).await;
                }
                Some(command) = self.command_receiver.recv() => {
                    self.handle_command(command).await;
                }
                Some(job_id) = self.finished_rx.recv() => {
                    self.release(&job_id);
                }
                _ = self.shutdown_token.cancelled() => {
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    async fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::TriggerJob { job_id, response } => {
                let result = self.enqueue(&job_id, "manual").await;
                match &result {
                    Ok(()) => info!("Job {} triggered manually", job_id),
                    Err(e) => info!("Manual trigger of {} refused: {}", job_id, e),
                }
                let _ = response.send(result);
                self.dispatch_pending().await;
            }
        }
    }

    async fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let jobs: Vec<String> = {
            let state = self.shared_state.read().await;
            state
                .jobs
                .values()
                .filter(|job| job.schedule() == JobSchedule::Hook(event))
                .map(|job| job.id().to_string())
                .collect()
        };

        let triggered_by = format!("hook:{}", event);
        for job_id in jobs {
            if let Err(e) = self.enqueue(&job_id, &triggered_by).await {
                debug!("Hook {} skipped job {}: {}", event, job_id, e);
            }
        }
        self.dispatch_pending().await;
    }

    /// Queue a job. A job is never queued twice nor queued while it runs.
    async fn enqueue(&mut self, job_id: &str, triggered_by: &str) -> Result<(), JobError> {
        {
            let mut state = self.shared_state.write().await;
            if !state.jobs.contains_key(job_id) {
                return Err(JobError::NotFound);
            }
            if state.running_jobs.contains(job_id) {
                return Err(JobError::AlreadyRunning);
            }
            if !state.queued_jobs.insert(job_id.to_string()) {
                return Err(JobError::AlreadyQueued);
            }
        }

        self.pending.push_back(PendingRun {
            job_id: job_id.to_string(),
            triggered_by: triggered_by.to_string(),
        });
        metrics::set_background_job_queue_depth(self.pending.len());
        debug!("Queued job {} ({})", job_id, triggered_by);
        Ok(())
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn key_in_use(&self, key: &str) -> bool {
        self.running
            .values()
            .any(|running| running.exclusivity_key == Some(key))
    }

    /// Start queued jobs, oldest first, while slots are free.
    async fn dispatch_pending(&mut self) {
        let mut index = 0;
        while index < self.pending.len() {
            let Some(slot) = self.free_slot() else {
                break;
            };

            let job = {
                let state = self.shared_state.read().await;
                state.jobs.get(&self.pending[index].job_id).cloned()
            };
            let Some(job) = job else {
                self.pending.remove(index);
                continue;
            };

            // Previous run finished but its slot is not released yet.
            if self.running.contains_key(job.id()) {
                index += 1;
                continue;
            }

            if let Some(key) = job.exclusivity_key() {
                if self.key_in_use(key) {
                    index += 1;
                    continue;
                }
            }

            if let Some(run) = self.pending.remove(index) {
                self.start_run(job, run, slot).await;
            }
        }
        metrics::set_background_job_queue_depth(self.pending.len());
    }

    fn worker_id(&self, slot: usize) -> String {
        format!("{}/slot-{}", self.instance_id, slot)
    }

    async fn start_run(&mut self, job: Arc<dyn BackgroundJob>, run: PendingRun, slot: usize) {
        let job_id = run.job_id;
        let triggered_by = run.triggered_by;
        let worker_id = self.worker_id(slot);

        {
            let mut state = self.shared_state.write().await;
            state.queued_jobs.remove(&job_id);
            state.running_jobs.insert(job_id.clone());
        }
        self.slots[slot] = Some(job_id.clone());
        metrics::set_background_job_running(&job_id, true);
        info!(
            "Starting job {} on {} (triggered by {})",
            job_id, worker_id, triggered_by
        );

        // Jobs that must finish are not tied to the shutdown token.
        let cancel_token = match job.shutdown_behavior() {
            ShutdownBehavior::Cancellable => self.shutdown_token.child_token(),
            ShutdownBehavior::WaitForCompletion => CancellationToken::new(),
        };
        let ctx = self.job_context.with_cancellation_token(cancel_token);
        let exclusivity_key = job.exclusivity_key();
        let server_store = self.server_store.clone();
        let shared_state = self.shared_state.clone();
        let finished_tx = self.finished_tx.clone();
        let task_job_id = job_id.clone();

        let handle = tokio::spawn(async move {
            let job_id = task_job_id;
            let audit = JobAuditLogger::new(server_store.clone(), &job_id);
            audit.log_started(Some(json!({
                "triggered_by": triggered_by,
                "worker_id": worker_id,
            })));

            let start = Instant::now();
            let result = tracked_run(job, ctx, server_store, &triggered_by, &worker_id).await;
            let elapsed = start.elapsed();

            let status = match &result {
                Ok(()) => {
                    info!("Job {} completed in {:?}", job_id, elapsed);
                    audit.log_completed(None);
                    "success"
                }
                Err(JobError::Cancelled) => {
                    warn!("Job {} was cancelled after {:?}", job_id, elapsed);
                    audit.log_failed(&JobError::Cancelled.to_string(), None);
                    "cancelled"
                }
                Err(e) => {
                    error!("Job {} failed after {:?}: {}", job_id, elapsed, e);
                    audit.log_failed(&e.to_string(), None);
                    "failed"
                }
            };
            metrics::record_background_job_execution(&job_id, status, elapsed);
            metrics::set_background_job_running(&job_id, false);

            shared_state.write().await.running_jobs.remove(&job_id);
            let _ = finished_tx.send(job_id);
        });

        self.running.insert(
            job_id,
            RunningJob {
                handle,
                slot,
                exclusivity_key,
            },
        );
    }

    /// Free the slot of a finished job and start whatever can start now.
    fn release(&mut self, job_id: &str) {
        if let Some(running) = self.running.remove(job_id) {
            self.slots[running.slot] = None;
            debug!("Job {} released slot {}", job_id, running.slot);
        }
    }

    async fn enqueue_due_jobs(&mut self) {
        let now = Utc::now();
        let jobs: Vec<(String, JobSchedule)> = {
            let state = self.shared_state.read().await;
            state
                .jobs
                .values()
                .map(|job| (job.id().to_string(), job.schedule()))
                .collect()
        };

        for (job_id, schedule) in jobs {
            let Some(next_run) = self.get_next_run_time(&job_id, &schedule, now) else {
                continue;
            };
            if next_run > now {
                continue;
            }
            self.advance_schedule(&job_id, &schedule, now);
            if let Err(e) = self.enqueue(&job_id, "schedule").await {
                info!("Skipping scheduled run of {}: {}", job_id, e);
            }
        }
    }

    /// Next fire time of a scheduled job. Jobs seen for the first time get
    /// their first fire time stored: `now` for interval jobs, the next cron
    /// match otherwise.
    fn get_next_run_time(
        &self,
        job_id: &str,
        schedule: &JobSchedule,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let stored = match self.server_store.get_schedule_state(job_id) {
            Ok(state) => state,
            Err(e) => {
                error!("Failed to read schedule state of {}: {:#}", job_id, e);
                return None;
            }
        };

        let next_run_at = match (schedule, stored) {
            (JobSchedule::Hook(_) | JobSchedule::Manual, _) => return None,
            (_, Some(state)) => return Some(state.next_run_at),
            (JobSchedule::Interval(_), None) => now,
            (JobSchedule::Cron(_), None) => self.crons.get(job_id)?.next_after(now)?,
        };
        self.save_schedule_state(JobScheduleState {
            job_id: job_id.to_string(),
            next_run_at,
            last_run_at: None,
        });
        Some(next_run_at)
    }

    fn advance_schedule(&self, job_id: &str, schedule: &JobSchedule, now: DateTime<Utc>) {
        let next_run_at = match schedule {
            JobSchedule::Interval(interval) => match chrono::Duration::from_std(*interval) {
                Ok(interval) => now + interval,
                Err(_) => return,
            },
            JobSchedule::Cron(_) => match self.crons.get(job_id).and_then(|c| c.next_after(now)) {
                Some(next) => next,
                None => return,
            },
            JobSchedule::Hook(_) | JobSchedule::Manual => return,
        };
        self.save_schedule_state(JobScheduleState {
            job_id: job_id.to_string(),
            next_run_at,
            last_run_at: Some(now),
        });
    }

    fn save_schedule_state(&self, state: JobScheduleState) {
        if let Err(e) = self.server_store.update_schedule_state(&state) {
            error!("Failed to save schedule state of {}: {:#}", state.job_id, e);
        }
    }

    async fn time_until_next_scheduled_job(&self) -> Duration {
        let now = Utc::now();
        let jobs: Vec<(String, JobSchedule)> = {
            let state = self.shared_state.read().await;
            state
                .jobs
                .values()
                .map(|job| (job.id().to_string(), job.schedule()))
                .collect()
        };

        jobs.iter()
            .filter_map(|(job_id, schedule)| self.get_next_run_time(job_id, schedule, now))
            .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO))
            .min()
            .map_or(IDLE_WAIT, |wait| wait.min(IDLE_WAIT))
    }

    async fn shutdown(&mut self) {
        info!(
            "Shutting down job scheduler: {} running, {} queued",
            self.running.len(),
            self.pending.len()
        );

        self.pending.clear();
        self.shared_state.write().await.queued_jobs.clear();
        metrics::set_background_job_queue_depth(0);

        // Cancellable jobs hold children of the shutdown token and are
        // already cancelled here.
        let (job_ids, handles): (Vec<String>, Vec<JoinHandle<()>>) = self
            .running
            .drain()
            .map(|(job_id, running)| (job_id, running.handle))
            .unzip();
        if !handles.is_empty() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, join_all(handles)).await {
                Ok(_) => info!("All running jobs stopped"),
                Err(_) => warn!(
                    "Jobs still running after {:?}: {}",
                    SHUTDOWN_TIMEOUT,
                    job_ids.join(", ")
                ),
            }
        }
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }
}

/// Run a job inside a run-log entry: the run is recorded as started before
/// any work, finalized with its outcome and duration, and the job's error is
/// handed back to the caller.
async fn tracked_run(
    job: Arc<dyn BackgroundJob>,
    ctx: JobContext,
    server_store: Arc<dyn ServerStore>,
    triggered_by: &str,
    worker_id: &str,
) -> Result<(), JobError> {
    let task_name = job.id().to_string();
    let run_id = server_store
        .record_run_start(&task_name, triggered_by, worker_id)
        .map_err(|e| JobError::ExecutionFailed(format!("Cannot record run start: {:#}", e)))?;

    let start = Instant::now();
    let result = match tokio::spawn(async move { job.execute(&ctx).await }).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(JobError::ExecutionFailed("Job panicked".to_string())),
        Err(_) => Err(JobError::Cancelled),
    };
    let duration_ms = start.elapsed().as_millis() as i64;

    let (status, error_message) = match &result {
        Ok(()) => (RunStatus::Completed, None),
        Err(e) => (RunStatus::Failed, Some(e.to_string())),
    };
    if let Err(e) =
        server_store.record_run_finish(run_id, status, duration_ms, error_message.as_deref())
    {
        error!("Failed to finalize run {} of {}: {:#}", run_id, task_name, e);
    }

    result
}

/// Create a new job scheduler and its handle.
pub fn create_scheduler(
    server_store: Arc<dyn ServerStore>,
    hook_receiver: mpsc::Receiver<HookEvent>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
    max_concurrent: usize,
) -> (JobScheduler, SchedulerHandle) {
    let shared_state = Arc::new(RwLock::new(SharedJobState::default()));
    let (command_tx, command_rx) = mpsc::channel(100);

    let scheduler = JobScheduler::new(
        shared_state.clone(),
        server_store.clone(),
        hook_receiver,
        command_rx,
        shutdown_token,
        job_context,
        max_concurrent,
    );
    let handle = SchedulerHandle::new(command_tx, shared_state, server_store);

    (scheduler, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::context::testing::{test_context, TestContext};
    use crate::background_jobs::job::SCRAPE_EXCLUSIVITY_KEY;
    use crate::server_store::JobAuditEventType;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Tracks how many jobs run at once, overall and per exclusivity key.
    #[derive(Default)]
    struct Concurrency {
        active: AtomicUsize,
        active_scrape: AtomicUsize,
        max_active: AtomicUsize,
        max_scrape: AtomicUsize,
        /// (job id, scrape jobs active when it started)
        starts: Mutex<Vec<(String, usize)>>,
    }

    struct TestJob {
        id: &'static str,
        schedule: JobSchedule,
        key: Option<&'static str>,
        delay: Duration,
        fail: bool,
        shutdown: ShutdownBehavior,
        executions: Arc<AtomicUsize>,
        /// Whether the job's token was cancelled when it finished.
        saw_cancel: Arc<AtomicBool>,
        concurrency: Arc<Concurrency>,
    }

    impl TestJob {
        fn new(id: &'static str, schedule: JobSchedule) -> Self {
            Self {
                id,
                schedule,
                key: None,
                delay: Duration::ZERO,
                fail: false,
                shutdown: ShutdownBehavior::Cancellable,
                executions: Arc::new(AtomicUsize::new(0)),
                saw_cancel: Arc::new(AtomicBool::new(false)),
                concurrency: Arc::new(Concurrency::default()),
            }
        }
    }

    #[async_trait]
    impl BackgroundJob for TestJob {
        fn id(&self) -> &str {
            self.id
        }
        fn name(&self) -> &str {
            "Test Job"
        }
        fn description(&self) -> &str {
            "A test job"
        }
        fn schedule(&self) -> JobSchedule {
            self.schedule.clone()
        }
        fn exclusivity_key(&self) -> Option<&'static str> {
            self.key
        }
        fn shutdown_behavior(&self) -> ShutdownBehavior {
            self.shutdown
        }
        async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
            let c = &self.concurrency;
            let scrape = self.key == Some(SCRAPE_EXCLUSIVITY_KEY);
            let active = c.active.fetch_add(1, Ordering::SeqCst) + 1;
            c.max_active.fetch_max(active, Ordering::SeqCst);
            if scrape {
                let active_scrape = c.active_scrape.fetch_add(1, Ordering::SeqCst) + 1;
                c.max_scrape.fetch_max(active_scrape, Ordering::SeqCst);
            }
            c.starts
                .lock()
                .unwrap()
                .push((self.id.to_string(), c.active_scrape.load(Ordering::SeqCst)));

            self.executions.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.saw_cancel.store(ctx.is_cancelled(), Ordering::SeqCst);

            if scrape {
                c.active_scrape.fetch_sub(1, Ordering::SeqCst);
            }
            c.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                Err(JobError::ExecutionFailed("Test failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct TestScheduler {
        scheduler: JobScheduler,
        handle: SchedulerHandle,
        shutdown_token: CancellationToken,
        test: TestContext,
        _hook_sender: mpsc::Sender<HookEvent>,
    }

    fn create_test_scheduler(max_concurrent: usize) -> TestScheduler {
        let test = test_context();
        let (hook_sender, hook_receiver) = mpsc::channel(100);
        let shutdown_token = CancellationToken::new();
        let (scheduler, handle) = create_scheduler(
            test.server_store.clone(),
            hook_receiver,
            shutdown_token.clone(),
            test.ctx.with_cancellation_token(shutdown_token.child_token()),
            max_concurrent,
        );
        TestScheduler {
            scheduler,
            handle,
            shutdown_token,
            test,
            _hook_sender: hook_sender,
        }
    }

    fn spawn(scheduler: JobScheduler) -> JoinHandle<()> {
        let mut scheduler = scheduler;
        tokio::spawn(async move {
            scheduler.run().await;
        })
    }

    async fn stop(shutdown_token: CancellationToken, handle: JoinHandle<()>) {
        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    #[tokio::test]
    async fn test_register_job() {
        let mut t = create_test_scheduler(2);
        t.scheduler
            .register_job(Arc::new(TestJob::new("test_job", JobSchedule::Manual)))
            .await;

        assert_eq!(t.scheduler.job_count().await, 1);
        assert!(t.handle.job_exists("test_job").await);
        assert!(!t.handle.job_exists("nope").await);
        assert_eq!(t.scheduler.worker_count(), 2);
    }

    #[tokio::test]
    async fn test_list_jobs() {
        let mut t = create_test_scheduler(2);
        let mut scrape = TestJob::new("b_job", JobSchedule::Manual);
        scrape.key = Some(SCRAPE_EXCLUSIVITY_KEY);
        t.scheduler.register_job(Arc::new(scrape)).await;
        t.scheduler
            .register_job(Arc::new(TestJob::new(
                "a_job",
                JobSchedule::Cron("0 9 * * 1".to_string()),
            )))
            .await;

        let jobs = t.handle.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "a_job");
        assert_eq!(jobs[0].schedule.schedule_type, "cron");
        assert!(jobs[0].exclusivity_key.is_none());
        assert_eq!(jobs[1].exclusivity_key.as_deref(), Some("scrape"));
        assert!(!jobs[1].is_running);
        assert!(jobs[1].last_run.is_none());

        assert!(t.handle.get_job("a_job").await.unwrap().is_some());
        assert!(t.handle.get_job("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_startup_hook_runs_and_records_run() {
        let mut t = create_test_scheduler(2);
        let job = TestJob::new("startup_job", JobSchedule::Hook(HookEvent::OnStartup));
        let executions = job.executions.clone();
        t.scheduler.register_job(Arc::new(job)).await;

        let sched = spawn(t.scheduler);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        let history = t.handle.get_job_history("startup_job", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "completed");
        assert_eq!(history[0].triggered_by, "hook:OnStartup");
        assert!(history[0].duration_ms.is_some());
        assert!(history[0].worker_id.ends_with("/slot-0"));

        stop(t.shutdown_token, sched).await;
    }

    #[tokio::test]
    async fn test_failed_run_is_finalized_with_error() {
        let mut t = create_test_scheduler(2);
        let mut job = TestJob::new("failing_job", JobSchedule::Hook(HookEvent::OnStartup));
        job.fail = true;
        t.scheduler.register_job(Arc::new(job)).await;

        let sched = spawn(t.scheduler);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let run = t
            .test
            .server_store
            .get_last_run("failing_job")
            .unwrap()
            .unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error_message.unwrap().contains("Test failure"));
        assert!(run.duration_ms.is_some());
        assert!(run.completed_at.is_some());

        let audit = t
            .handle
            .get_job_audit_log_by_job("failing_job", 10, 0)
            .unwrap();
        assert_eq!(audit[0].event_type, JobAuditEventType::Failed);
        assert!(audit[0].error.as_ref().unwrap().contains("Test failure"));

        stop(t.shutdown_token, sched).await;
    }

    #[tokio::test]
    async fn test_exclusive_jobs_never_overlap() {
        let mut t = create_test_scheduler(2);
        let concurrency = Arc::new(Concurrency::default());

        for id in ["scrape_one", "scrape_two"] {
            let mut job = TestJob::new(id, JobSchedule::Hook(HookEvent::OnStartup));
            job.key = Some(SCRAPE_EXCLUSIVITY_KEY);
            job.delay = Duration::from_millis(150);
            job.concurrency = concurrency.clone();
            t.scheduler.register_job(Arc::new(job)).await;
        }
        let mut digest = TestJob::new("digest", JobSchedule::Manual);
        digest.delay = Duration::from_millis(50);
        digest.concurrency = concurrency.clone();
        t.scheduler.register_job(Arc::new(digest)).await;

        let sched = spawn(t.scheduler);
        tokio::time::sleep(Duration::from_millis(30)).await;

        // one scrape job runs, the other waits for the key
        assert_eq!(concurrency.active_scrape.load(Ordering::SeqCst), 1);
        let queued = t.handle.is_job_queued("scrape_one").await
            || t.handle.is_job_queued("scrape_two").await;
        assert!(queued);

        // a job without a key takes the free slot right away
        t.handle.trigger_job("digest").await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(concurrency.max_scrape.load(Ordering::SeqCst), 1);
        assert_eq!(concurrency.max_active.load(Ordering::SeqCst), 2);
        let starts = concurrency.starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 3);
        let digest_start = starts.iter().find(|(id, _)| id == "digest").unwrap();
        assert_eq!(digest_start.1, 1, "digest should run alongside a scrape job");

        for id in ["scrape_one", "scrape_two", "digest"] {
            let run = t.test.server_store.get_last_run(id).unwrap().unwrap();
            assert_eq!(run.status, RunStatus::Completed);
        }

        stop(t.shutdown_token, sched).await;
    }

    #[tokio::test]
    async fn test_manual_trigger() {
        let mut t = create_test_scheduler(1);
        let mut job = TestJob::new("manual_job", JobSchedule::Manual);
        job.delay = Duration::from_millis(200);
        let executions = job.executions.clone();
        t.scheduler.register_job(Arc::new(job)).await;

        let sched = spawn(t.scheduler);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(executions.load(Ordering::SeqCst), 0);

        t.handle.trigger_job("manual_job").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(t.handle.is_job_running("manual_job").await);
        assert!(matches!(
            t.handle.trigger_job("manual_job").await,
            Err(JobError::AlreadyRunning)
        ));
        assert!(matches!(
            t.handle.trigger_job("unknown").await,
            Err(JobError::NotFound)
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(!t.handle.is_job_running("manual_job").await);
        let history = t.handle.get_job_history("manual_job", 10).unwrap();
        assert_eq!(history[0].triggered_by, "manual");

        stop(t.shutdown_token, sched).await;
    }

    #[tokio::test]
    async fn test_job_is_never_queued_twice() {
        let mut t = create_test_scheduler(1);
        let mut blocker = TestJob::new("blocker", JobSchedule::Hook(HookEvent::OnStartup));
        blocker.delay = Duration::from_millis(300);
        t.scheduler.register_job(Arc::new(blocker)).await;
        let waiting = TestJob::new("waiting", JobSchedule::Manual);
        let executions = waiting.executions.clone();
        t.scheduler.register_job(Arc::new(waiting)).await;

        let sched = spawn(t.scheduler);
        tokio::time::sleep(Duration::from_millis(50)).await;

        t.handle.trigger_job("waiting").await.unwrap();
        assert!(t.handle.is_job_queued("waiting").await);
        assert!(matches!(
            t.handle.trigger_job("waiting").await,
            Err(JobError::AlreadyQueued)
        ));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(executions.load(Ordering::SeqCst), 1);

        stop(t.shutdown_token, sched).await;
    }

    #[tokio::test]
    async fn test_stale_runs_marked_failed_on_startup() {
        let t = create_test_scheduler(2);
        let stale = t
            .test
            .server_store
            .record_run_start("band_catalog_sync", "schedule", "old/slot-0")
            .unwrap();

        let sched = spawn(t.scheduler);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let run = t.test.server_store.get_run(stale).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);

        stop(t.shutdown_token, sched).await;
    }

    #[tokio::test]
    async fn test_cron_job_gets_next_fire_time_without_running() {
        let mut t = create_test_scheduler(2);
        let job = TestJob::new("weekly", JobSchedule::Cron("0 3 * * 0".to_string()));
        let executions = job.executions.clone();
        t.scheduler.register_job(Arc::new(job)).await;

        let sched = spawn(t.scheduler);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(executions.load(Ordering::SeqCst), 0);
        let state = t
            .test
            .server_store
            .get_schedule_state("weekly")
            .unwrap()
            .unwrap();
        assert!(state.next_run_at > Utc::now());
        let info = t.handle.get_job("weekly").await.unwrap().unwrap();
        assert!(info.next_run_at.is_some());

        stop(t.shutdown_token, sched).await;
    }

    #[tokio::test]
    async fn test_overdue_cron_job_runs() {
        let mut t = create_test_scheduler(2);
        t.test
            .server_store
            .update_schedule_state(&JobScheduleState {
                job_id: "overdue".to_string(),
                next_run_at: Utc::now() - chrono::Duration::minutes(5),
                last_run_at: None,
            })
            .unwrap();
        let job = TestJob::new("overdue", JobSchedule::Cron("0 3 * * 0".to_string()));
        let executions = job.executions.clone();
        t.scheduler.register_job(Arc::new(job)).await;

        let sched = spawn(t.scheduler);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        let state = t
            .test
            .server_store
            .get_schedule_state("overdue")
            .unwrap()
            .unwrap();
        assert!(state.next_run_at > Utc::now());
        assert!(state.last_run_at.is_some());
        let history = t.handle.get_job_history("overdue", 10).unwrap();
        assert_eq!(history[0].triggered_by, "schedule");

        stop(t.shutdown_token, sched).await;
    }

    #[tokio::test]
    async fn test_interval_job_runs_at_startup_and_reschedules() {
        let mut t = create_test_scheduler(2);
        let job = TestJob::new("hourly", JobSchedule::Interval(Duration::from_secs(3600)));
        let executions = job.executions.clone();
        t.scheduler.register_job(Arc::new(job)).await;

        let sched = spawn(t.scheduler);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        let state = t
            .test
            .server_store
            .get_schedule_state("hourly")
            .unwrap()
            .unwrap();
        assert!(state.next_run_at > Utc::now() + chrono::Duration::minutes(59));
        assert!(state.last_run_at.is_some());
        let history = t.handle.get_job_history("hourly", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].triggered_by, "schedule");

        stop(t.shutdown_token, sched).await;
    }

    #[tokio::test]
    async fn test_wait_for_completion_job_is_not_cancelled_on_shutdown() {
        let mut t = create_test_scheduler(2);
        let mut cancellable = TestJob::new("cancellable", JobSchedule::Hook(HookEvent::OnStartup));
        cancellable.delay = Duration::from_millis(300);
        let cancellable_saw_cancel = cancellable.saw_cancel.clone();
        let mut finishing = TestJob::new("finishing", JobSchedule::Hook(HookEvent::OnStartup));
        finishing.delay = Duration::from_millis(300);
        finishing.shutdown = ShutdownBehavior::WaitForCompletion;
        let finishing_saw_cancel = finishing.saw_cancel.clone();
        let finishing_executions = finishing.executions.clone();
        t.scheduler.register_job(Arc::new(cancellable)).await;
        t.scheduler.register_job(Arc::new(finishing)).await;

        let sched = spawn(t.scheduler);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(finishing_executions.load(Ordering::SeqCst), 1);

        stop(t.shutdown_token, sched).await;

        assert!(cancellable_saw_cancel.load(Ordering::SeqCst));
        assert!(!finishing_saw_cancel.load(Ordering::SeqCst));
        let run = t
            .test
            .server_store
            .get_last_run("finishing")
            .unwrap()
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }
}
