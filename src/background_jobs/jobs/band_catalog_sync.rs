//! Weekly sweep of the alphabetical band listing.

use super::{launch, run_strategy};
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, SCRAPE_EXCLUSIVITY_KEY},
};
use crate::sync::BandCatalogSync;
use async_trait::async_trait;

pub struct BandCatalogSyncJob {
    cron: String,
}

impl BandCatalogSyncJob {
    pub fn new(cron: String) -> Self {
        Self { cron }
    }
}

#[async_trait]
impl BackgroundJob for BandCatalogSyncJob {
    fn id(&self) -> &str {
        BandCatalogSync::TASK_NAME
    }

    fn name(&self) -> &str {
        "Band Catalog Sync"
    }

    fn description(&self) -> &str {
        "Crawl every letter of the band listing and store unknown bands"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Cron(self.cron.clone())
    }

    fn exclusivity_key(&self) -> Option<&'static str> {
        Some(SCRAPE_EXCLUSIVITY_KEY)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let resources = launch(ctx)?;
        let strategy = BandCatalogSync::new(resources, ctx.sync.band_page_size);
        run_strategy(ctx, &strategy).await?;
        Ok(())
    }
}
