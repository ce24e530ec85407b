use super::{launch, run_strategy};
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, SCRAPE_EXCLUSIVITY_KEY},
};
use crate::sync::LatestBandsSync;
use async_trait::async_trait;
use chrono::Utc;

/// Picks up bands added upstream this month and last month.
pub struct LatestBandsSyncJob {
    cron: String,
}

impl LatestBandsSyncJob {
    pub fn new(cron: String) -> Self {
        Self { cron }
    }
}

#[async_trait]
impl BackgroundJob for LatestBandsSyncJob {
    fn id(&self) -> &str {
        LatestBandsSync::TASK_NAME
    }

    fn name(&self) -> &str {
        "Latest Bands Sync"
    }

    fn description(&self) -> &str {
        "Store bands added upstream during the current and previous month"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Cron(self.cron.clone())
    }

    fn exclusivity_key(&self) -> Option<&'static str> {
        Some(SCRAPE_EXCLUSIVITY_KEY)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let resources = launch(ctx)?;
        let today = Utc::now().date_naive();
        let strategy = LatestBandsSync::new(resources, ctx.sync.band_page_size, today);
        run_strategy(ctx, &strategy).await?;
        Ok(())
    }
}
