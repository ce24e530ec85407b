use super::{launch, run_strategy};
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, SCRAPE_EXCLUSIVITY_KEY},
};
use crate::sync::UpcomingReleasesSync;
use async_trait::async_trait;

/// Captures the upstream's upcoming releases listing.
pub struct UpcomingReleasesSyncJob {
    cron: String,
}

impl UpcomingReleasesSyncJob {
    pub fn new(cron: String) -> Self {
        Self { cron }
    }
}

#[async_trait]
impl BackgroundJob for UpcomingReleasesSyncJob {
    fn id(&self) -> &str {
        UpcomingReleasesSync::TASK_NAME
    }

    fn name(&self) -> &str {
        "Upcoming Releases Sync"
    }

    fn description(&self) -> &str {
        "Store announced albums, creating their bands when unknown"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Cron(self.cron.clone())
    }

    fn exclusivity_key(&self) -> Option<&'static str> {
        Some(SCRAPE_EXCLUSIVITY_KEY)
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let resources = launch(ctx)?;
        let strategy = UpcomingReleasesSync::new(resources, ctx.sync.upcoming_page_size);
        run_strategy(ctx, &strategy).await?;
        Ok(())
    }
}
