use super::{ExhaustionPolicy, SyncError, SyncState, SyncStrategy};
use crate::catalog_store::UpsertOutcome;
use crate::server::metrics;
use crate::server_store::{JobAuditEventType, ServerStore};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Server state key holding the last completed partition of a task.
pub fn checkpoint_key(task_name: &str) -> String {
    format!("sync_checkpoint:{}", task_name)
}

/// Summary of one finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub task_name: String,
    pub partitions_done: usize,
    pub partitions_skipped: usize,
    pub pages_fetched: usize,
    pub inserted: usize,
    pub ignored: usize,
    /// Partition the run resumed after, if it picked up a checkpoint.
    pub resumed_after: Option<String>,
}

pub struct PaginatedSyncDriver {
    server_store: Arc<dyn ServerStore>,
    cancellation_token: CancellationToken,
    state: SyncState,
}

impl PaginatedSyncDriver {
    pub fn new(server_store: Arc<dyn ServerStore>, cancellation_token: CancellationToken) -> Self {
        Self {
            server_store,
            cancellation_token,
            state: SyncState::Idle,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    fn advance(&mut self, next: SyncState) -> Result<(), SyncError> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::Store(anyhow::anyhow!(
                "Illegal sync transition {} -> {}",
                self.state,
                next
            )));
        }
        self.state = next;
        Ok(())
    }

    fn abort(&mut self, err: SyncError) -> SyncError {
        self.state = SyncState::Aborted;
        err
    }

    /// Partitions still to do, skipping those an earlier interrupted run
    /// already completed.
    fn remaining_partitions<S: SyncStrategy>(
        &self,
        strategy: &S,
        partitions: Vec<String>,
    ) -> (Vec<String>, Option<String>) {
        if !strategy.checkpointed() {
            return (partitions, None);
        }
        let key = checkpoint_key(strategy.task_name());
        let last_done = match self.server_store.get_state(&key) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read checkpoint {}: {}", key, e);
                None
            }
        };
        let Some(last_done) = last_done else {
            return (partitions, None);
        };
        match partitions.iter().position(|p| *p == last_done) {
            Some(pos) => {
                info!(
                    "{}: resuming after partition {}",
                    strategy.task_name(),
                    last_done
                );
                (partitions[pos + 1..].to_vec(), Some(last_done))
            }
            None => {
                warn!(
                    "{}: checkpoint {} matches no partition, starting over",
                    strategy.task_name(),
                    last_done
                );
                (partitions, None)
            }
        }
    }

    fn record_partition(&self, task_name: &str, partition: &str, status: &str, outcome: UpsertOutcome) {
        metrics::record_partition(task_name, status);
        let details = json!({
            "partition": partition,
            "status": status,
            "inserted": outcome.inserted,
            "ignored": outcome.ignored,
        });
        if let Err(e) = self.server_store.log_job_audit(
            task_name,
            JobAuditEventType::Progress,
            None,
            Some(&details),
            None,
        ) {
            warn!("{}: failed to log progress of {}: {}", task_name, partition, e);
        }
    }

    fn save_checkpoint(&self, task_name: &str, partition: &str) {
        if let Err(e) = self
            .server_store
            .set_state(&checkpoint_key(task_name), partition)
        {
            warn!("{}: failed to save checkpoint: {}", task_name, e);
        }
    }

    /// Run every partition of `strategy` to completion.
    pub async fn run<S: SyncStrategy>(&mut self, strategy: &S) -> Result<SyncReport, SyncError> {
        let task_name = strategy.task_name().to_string();
        let page_size = strategy.page_size();

        let partitions = strategy
            .partitions()
            .map_err(|e| self.abort(SyncError::Store(e)))?;
        let (partitions, resumed_after) = self.remaining_partitions(strategy, partitions);

        let mut report = SyncReport {
            task_name: task_name.clone(),
            resumed_after,
            ..Default::default()
        };

        self.advance(SyncState::Paginating)?;
        info!("{}: syncing {} partitions", task_name, partitions.len());

        'partitions: for partition in &partitions {
            if self.cancellation_token.is_cancelled() {
                info!("{}: cancelled before partition {}", task_name, partition);
                return Err(self.abort(SyncError::Cancelled));
            }

            let mut outcome = UpsertOutcome::default();
            let mut offset = 0;
            loop {
                self.advance(SyncState::Fetching)?;
                let raw = match strategy.fetch_page(partition, offset).await {
                    Ok(raw) => raw,
                    Err(e) => match strategy.on_exhausted() {
                        ExhaustionPolicy::AbortRun => {
                            warn!("{}: aborting at partition {}: {}", task_name, partition, e);
                            return Err(self.abort(SyncError::Fetch(e)));
                        }
                        ExhaustionPolicy::SkipPartition => {
                            warn!("{}: skipping partition {}: {}", task_name, partition, e);
                            self.advance(SyncState::Paginating)?;
                            report.partitions_skipped += 1;
                            report.inserted += outcome.inserted;
                            report.ignored += outcome.ignored;
                            self.record_partition(&task_name, partition, "skipped", outcome);
                            continue 'partitions;
                        }
                    },
                };
                report.pages_fetched += 1;

                self.advance(SyncState::Extracting)?;
                let page = strategy.extract(raw);
                let raw_len = page.raw_len;
                let total = page.total;

                self.advance(SyncState::Resolving)?;
                let items = strategy
                    .resolve(page.items)
                    .await
                    .map_err(|e| self.abort(e))?;

                self.advance(SyncState::Persisting)?;
                let persisted = strategy
                    .persist(partition, items)
                    .await
                    .map_err(|e| self.abort(e))?;
                outcome.merge(persisted);

                offset += raw_len;
                debug!(
                    "{}: partition {} page at {} had {} rows",
                    task_name, partition, offset, raw_len
                );
                let short_page = raw_len < page_size;
                let total_reached = total.is_some_and(|t| offset >= t);
                if short_page || total_reached {
                    break;
                }
            }

            self.advance(SyncState::Paginating)?;
            report.partitions_done += 1;
            report.inserted += outcome.inserted;
            report.ignored += outcome.ignored;
            metrics::record_items_persisted(&task_name, outcome.inserted);
            self.record_partition(&task_name, partition, "done", outcome);
            if strategy.checkpointed() {
                self.save_checkpoint(&task_name, partition);
            }
            info!(
                "{}: partition {} done ({} new, {} known)",
                task_name, partition, outcome.inserted, outcome.ignored
            );
        }

        self.advance(SyncState::Done)?;
        if strategy.checkpointed() {
            if let Err(e) = self.server_store.delete_state(&checkpoint_key(&task_name)) {
                warn!("{}: failed to clear checkpoint: {}", task_name, e);
            }
        }
        info!(
            "{}: done, {} partitions ({} skipped), {} inserted",
            task_name, report.partitions_done, report.partitions_skipped, report.inserted
        );
        Ok(report)
    }
}
