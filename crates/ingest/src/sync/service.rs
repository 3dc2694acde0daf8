//! Application-facing sync entry points

use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

use super::orchestrator::SyncOrchestrator;
use crate::error::SyncResult;
use crate::models::{JobId, Source, SyncJob, SyncMode, TenantId};

/// Default number of jobs returned by [`SyncService::job_history`]
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Triggers background sync jobs and answers job queries
///
/// Cloning is cheap; all clones share one orchestrator.
#[derive(Clone)]
pub struct SyncService {
    orchestrator: Arc<SyncOrchestrator>,
}

impl SyncService {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// Start an incremental sync and return its job id immediately
    pub async fn trigger_sync(&self, tenant: &TenantId, source: Source) -> SyncResult<JobId> {
        self.trigger(tenant, source, SyncMode::Incremental).await
    }

    /// Start a sync in any mode and return its job id immediately
    ///
    /// The job row exists (as `pending`) before this returns; the run itself
    /// happens on a spawned task.
    pub async fn trigger(&self, tenant: &TenantId, source: Source, mode: SyncMode) -> SyncResult<JobId> {
        let job = self.orchestrator.jobs().create(tenant, source, mode).await?;
        let id = job.id.clone();
        let orchestrator = self.orchestrator.clone();

        tokio::spawn(async move {
            let run = {
                let orchestrator = orchestrator.clone();
                let job = job.clone();
                tokio::spawn(async move { orchestrator.run(&job).await })
            };
            match run.await {
                Ok(Ok(done)) => info!("Sync job {} finished as {}", done.id, done.status),
                Ok(Err(e)) => error!("Sync job {} could not be tracked: {}", job.id, e),
                Err(join_err) => {
                    // A panicking run must not leave the row running forever
                    error!("Sync job {} aborted: {}", job.id, join_err);
                    let message = format!("job aborted: {}", join_err);
                    if let Err(e) = orchestrator.jobs().fail(&job.tenant_id, &job.id, &message).await {
                        error!("Could not mark aborted job {} as failed: {}", job.id, e);
                    }
                }
            }
        });

        Ok(id)
    }

    /// Most recent job for a tenant, optionally for one source
    pub async fn last_job(&self, tenant: &TenantId, source: Option<Source>) -> SyncResult<Option<SyncJob>> {
        self.orchestrator.jobs().last(tenant, source).await
    }

    /// Recent jobs for a tenant, newest first
    pub async fn job_history(&self, tenant: &TenantId, limit: usize) -> SyncResult<Vec<SyncJob>> {
        self.orchestrator.jobs().history(tenant, limit).await
    }

    pub async fn job(&self, tenant: &TenantId, id: &JobId) -> SyncResult<SyncJob> {
        self.orchestrator.jobs().get(tenant, id).await
    }

    /// Ask a running job to stop before its next page
    pub async fn request_cancel(&self, tenant: &TenantId, id: &JobId) -> SyncResult<()> {
        self.orchestrator.jobs().request_cancel(tenant, id).await
    }

    /// Poll a job until it reaches a terminal status
    pub async fn wait_for(&self, tenant: &TenantId, id: &JobId, poll: Duration) -> SyncResult<SyncJob> {
        loop {
            let job = self.job(tenant, id).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll).await;
        }
    }
}
