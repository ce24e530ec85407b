//! Digest of the releases coming out soon.
//!
//! The job only reads the catalog store. Delivering the digest is up to the
//! configured [`DigestSink`].

use crate::background_jobs::{
    audit_logger::JobAuditLogger,
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
};
use crate::catalog_store::UpcomingReleaseRecord;
use crate::server_store::ServerStore;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

pub const RELEASE_DIGEST_JOB_ID: &str = "release_digest";

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseDigest {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub releases: Vec<UpcomingReleaseRecord>,
}

/// Where a finished digest goes.
#[async_trait]
pub trait DigestSink: Send + Sync {
    async fn deliver(&self, digest: &ReleaseDigest) -> anyhow::Result<()>;
}

/// Logs the digest and keeps a copy in the job audit log.
pub struct AuditLogDigestSink {
    server_store: Arc<dyn ServerStore>,
}

impl AuditLogDigestSink {
    pub fn new(server_store: Arc<dyn ServerStore>) -> Self {
        Self { server_store }
    }
}

#[async_trait]
impl DigestSink for AuditLogDigestSink {
    async fn deliver(&self, digest: &ReleaseDigest) -> anyhow::Result<()> {
        info!(
            "Release digest {} to {}: {} release(s)",
            digest.from,
            digest.to,
            digest.releases.len()
        );
        for release in &digest.releases {
            let date = release
                .release_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "unknown date".to_string());
            info!(
                "  {} - {} ({}, {})",
                release.band_name, release.album_name, release.release_type, date
            );
        }

        JobAuditLogger::new(self.server_store.clone(), RELEASE_DIGEST_JOB_ID)
            .log_progress(serde_json::to_value(digest)?);
        Ok(())
    }
}

pub struct ReleaseDigestJob {
    cron: String,
    days: i64,
    sink: Arc<dyn DigestSink>,
}

impl ReleaseDigestJob {
    pub fn new(cron: String, days: i64, sink: Arc<dyn DigestSink>) -> Self {
        Self { cron, days, sink }
    }

    pub fn build_digest(&self, ctx: &JobContext, today: NaiveDate) -> anyhow::Result<ReleaseDigest> {
        let to = today + Duration::days(self.days);
        let releases = ctx.catalog_store.get_upcoming_releases_between(today, to)?;
        Ok(ReleaseDigest {
            from: today,
            to,
            releases,
        })
    }
}

#[async_trait]
impl BackgroundJob for ReleaseDigestJob {
    fn id(&self) -> &str {
        RELEASE_DIGEST_JOB_ID
    }

    fn name(&self) -> &str {
        "Release Digest"
    }

    fn description(&self) -> &str {
        "Collect the releases due in the next days and hand them to the digest sink"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Cron(self.cron.clone())
    }

    /// Digests in progress finish even when the service shuts down.
    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::WaitForCompletion
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let digest = self
            .build_digest(ctx, Utc::now().date_naive())
            .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;
        let count = digest.releases.len();

        self.sink
            .deliver(&digest)
            .await
            .map_err(|e| JobError::ExecutionFailed(format!("Digest delivery failed: {:#}", e)))?;

        info!(
            "Release digest delivered: {} release(s) between {} and {}",
            count, digest.from, digest.to
        );
        Ok(())
    }
}
