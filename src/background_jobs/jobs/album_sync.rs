use super::{launch, run_strategy};
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, SCRAPE_EXCLUSIVITY_KEY},
};
use crate::catalog_store::Shard;
use crate::sync::{stale_before, AlbumSync};
use async_trait::async_trait;
use chrono::Utc;

/// Discography sync for the bands of one shard. One job is registered per
/// configured shard.
pub struct AlbumSyncJob {
    shard: Shard,
    id: String,
    name: String,
    schedule: JobSchedule,
}

impl AlbumSyncJob {
    pub fn new(shard: Shard, schedule: JobSchedule) -> Self {
        Self {
            shard,
            id: AlbumSync::task_name_for(shard),
            name: format!("Album Sync (shard {})", shard),
            schedule,
        }
    }
}

#[async_trait]
impl BackgroundJob for AlbumSyncJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Store albums and tracks of bands never synced or synced too long ago"
    }

    fn schedule(&self) -> JobSchedule {
        self.schedule.clone()
    }

    fn exclusivity_key(&self) -> Option<&'static str> {
        Some(SCRAPE_EXCLUSIVITY_KEY)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let resources = launch(ctx)?;
        let cutoff = stale_before(Utc::now(), ctx.sync.album_stale_days);
        let strategy = AlbumSync::new(
            resources,
            self.shard,
            ctx.sync.album_page_size,
            ctx.sync.band_attempts,
            cutoff,
        )
        .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;
        run_strategy(ctx, &strategy).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::context::testing::test_context;
    use crate::catalog_store::{CatalogStore, NewBand};

    fn band(id: i64) -> NewBand {
        NewBand {
            external_id: id,
            slug: format!("Band_{}", id),
            display_name: format!("Band {}", id),
            country_of_origin: "Norway".to_string(),
            genre_tags: vec![],
            lifecycle_status: "Active".to_string(),
        }
    }

    #[test]
    fn test_job_identity() {
        let job = AlbumSyncJob::new(Shard::new(1, 4).unwrap(), JobSchedule::Manual);
        assert_eq!(job.id(), "album_sync_shard_1");
        assert_eq!(job.name(), "Album Sync (shard 1/4)");
    }

    #[tokio::test]
    async fn test_only_bands_of_the_shard_are_synced() {
        let t = test_context();
        t.catalog_store
            .upsert_bands(&[band(10), band(11), band(12), band(13)])
            .unwrap();

        // every discography is a 404, so each band of the shard is marked synced
        let job = AlbumSyncJob::new(Shard::new(0, 2).unwrap(), JobSchedule::Manual);
        job.execute(&t.ctx).await.unwrap();

        let shard = Shard::new(0, 2).unwrap();
        let other = Shard::new(1, 2).unwrap();
        let cutoff = Utc::now() - chrono::Duration::days(1);
        assert!(t
            .catalog_store
            .get_bands_needing_album_sync(shard, cutoff)
            .unwrap()
            .is_empty());
        assert_eq!(
            t.catalog_store
                .get_bands_needing_album_sync(other, cutoff)
                .unwrap()
                .len(),
            2
        );
    }
}
