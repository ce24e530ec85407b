//! Background job implementations.
//!
//! The four sync jobs share the `scrape` exclusivity key, so the upstream
//! never sees two of them at once. The release digest only reads the store.

mod album_sync;
mod band_catalog_sync;
mod latest_bands_sync;
mod release_digest;
mod upcoming_releases_sync;

pub use album_sync::AlbumSyncJob;
pub use band_catalog_sync::BandCatalogSyncJob;
pub use latest_bands_sync::LatestBandsSyncJob;
pub use release_digest::{AuditLogDigestSink, DigestSink, ReleaseDigest, ReleaseDigestJob};
pub use upcoming_releases_sync::UpcomingReleasesSyncJob;

use super::context::JobContext;
use super::job::{BackgroundJob, JobError, JobSchedule};
use crate::catalog_store::Shard;
use crate::config::{SchedulerSettings, SyncSettings};
use crate::server::metrics;
use crate::server_store::ServerStore;
use crate::sync::{SyncError, SyncReport, SyncResources, SyncStrategy};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

impl From<SyncError> for JobError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Cancelled => JobError::Cancelled,
            other => JobError::ExecutionFailed(other.to_string()),
        }
    }
}

/// Open the upstream for one run.
fn launch(ctx: &JobContext) -> Result<SyncResources, JobError> {
    ctx.sync_resources()
        .map_err(|e| JobError::ExecutionFailed(format!("Cannot open upstream session: {:#}", e)))
}

fn refresh_catalog_metrics(ctx: &JobContext) {
    let store = &ctx.catalog_store;
    metrics::set_catalog_counts(
        store.get_bands_count(),
        store.get_albums_count(),
        store.get_tracks_count(),
        store.get_upcoming_count(),
    );
}

/// Drive a strategy to completion and refresh the catalog gauges, whatever
/// the outcome.
async fn run_strategy<S: SyncStrategy>(ctx: &JobContext, strategy: &S) -> Result<SyncReport, JobError> {
    if ctx.is_cancelled() {
        return Err(JobError::Cancelled);
    }

    let result = ctx.sync_driver().run(strategy).await;
    refresh_catalog_metrics(ctx);
    let report = result?;

    info!(
        "{}: {} partition(s) done, {} skipped, {} inserted, {} ignored",
        report.task_name,
        report.partitions_done,
        report.partitions_skipped,
        report.inserted,
        report.ignored
    );
    Ok(report)
}

/// Every job of the service, configured from the settings.
pub fn build_jobs(
    scheduler: &SchedulerSettings,
    sync: &SyncSettings,
    server_store: Arc<dyn ServerStore>,
) -> anyhow::Result<Vec<Arc<dyn BackgroundJob>>> {
    let mut jobs: Vec<Arc<dyn BackgroundJob>> = vec![
        Arc::new(BandCatalogSyncJob::new(scheduler.band_catalog_cron.clone())),
        Arc::new(LatestBandsSyncJob::new(scheduler.latest_bands_cron.clone())),
        Arc::new(UpcomingReleasesSyncJob::new(
            scheduler.upcoming_releases_cron.clone(),
        )),
    ];

    let album_schedule = match scheduler.album_sync_interval_mins {
        Some(minutes) => JobSchedule::Interval(Duration::from_secs(minutes * 60)),
        None => JobSchedule::Cron(scheduler.album_sync_cron.clone()),
    };
    for index in 0..sync.album_shards {
        let shard = Shard::new(index, sync.album_shards)?;
        jobs.push(Arc::new(AlbumSyncJob::new(shard, album_schedule.clone())));
    }

    jobs.push(Arc::new(ReleaseDigestJob::new(
        scheduler.release_digest_cron.clone(),
        sync.digest_days,
        Arc::new(AuditLogDigestSink::new(server_store)),
    )));

    Ok(jobs)
}
