//! Sync job tracking
//!
//! Owns every write to `tenant/{id}/sync_jobs`. Status moves
//! `pending -> running -> {complete, error}`; once a job is terminal no
//! further status or counter change is accepted.
//!
//! Each check-then-merge runs under one lock shared by every clone of the
//! tracker, so a cancel or counter write cannot land on a job that finished
//! in between. Writers in another process (a second CLI invocation) are not
//! covered by the lock; a stray `cancel_requested` on a finished job is never
//! read again.

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{SyncError, SyncResult};
use crate::models::{JobCounters, JobId, JobStatus, Source, SyncJob, SyncMode, TenantId};
use crate::storage::{Fields, SyncStore, to_fields};

/// Job lifecycle state machine over the store
#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn SyncStore>,
    writes: Arc<Mutex<()>>,
}

impl JobTracker {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self {
            store,
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Create a pending job
    pub async fn create(&self, tenant: &TenantId, source: Source, mode: SyncMode) -> SyncResult<SyncJob> {
        let job = SyncJob::pending(tenant.clone(), source, mode);
        self.store
            .merge_sync_job(tenant, &job.id, to_fields(&job)?)
            .await?;
        debug!("Created {} sync job {} for tenant {}", source, job.id, tenant);
        Ok(job)
    }

    /// Load a job
    pub async fn get(&self, tenant: &TenantId, id: &JobId) -> SyncResult<SyncJob> {
        self.store
            .get_sync_job(tenant, id)
            .await?
            .ok_or_else(|| SyncError::JobNotFound(id.clone()))
    }

    pub async fn mark_running(&self, tenant: &TenantId, id: &JobId) -> SyncResult<()> {
        let mut fields = Fields::new();
        fields.insert("started_at".into(), json!(Utc::now()));
        self.transition(tenant, id, JobStatus::Running, fields).await
    }

    /// Persist cumulative counters after a page
    pub async fn record_page(
        &self,
        tenant: &TenantId,
        id: &JobId,
        totals: &JobCounters,
        last_error: Option<&str>,
    ) -> SyncResult<()> {
        let _guard = self.writes.lock().await;
        let job = self.get(tenant, id).await?;
        if job.status.is_terminal() {
            return Err(SyncError::JobTerminal(id.clone(), job.status));
        }
        if job.status != JobStatus::Running {
            return Err(SyncError::InvalidTransition(id.clone(), job.status, JobStatus::Running));
        }

        let mut fields = to_fields(totals)?;
        if let Some(err) = last_error {
            fields.insert("last_error".into(), json!(err));
        }
        self.store.merge_sync_job(tenant, id, fields).await?;
        Ok(())
    }

    /// Finish a job after the provider reported no further pages
    pub async fn complete(&self, tenant: &TenantId, id: &JobId) -> SyncResult<()> {
        let mut fields = Fields::new();
        fields.insert("finished_at".into(), json!(Utc::now()));
        self.transition(tenant, id, JobStatus::Complete, fields).await?;
        info!("Sync job {} complete", id);
        Ok(())
    }

    /// End a job on a fatal condition, keeping its partial counters
    pub async fn fail(&self, tenant: &TenantId, id: &JobId, message: &str) -> SyncResult<()> {
        let mut fields = Fields::new();
        fields.insert("finished_at".into(), json!(Utc::now()));
        fields.insert("error_message".into(), json!(message));
        self.transition(tenant, id, JobStatus::Error, fields).await?;
        warn!("Sync job {} failed: {}", id, message);
        Ok(())
    }

    /// Ask a job to stop before its next page
    pub async fn request_cancel(&self, tenant: &TenantId, id: &JobId) -> SyncResult<()> {
        let _guard = self.writes.lock().await;
        let job = self.get(tenant, id).await?;
        if job.status.is_terminal() {
            return Err(SyncError::JobTerminal(id.clone(), job.status));
        }
        let mut fields = Fields::new();
        fields.insert("cancel_requested".into(), json!(true));
        self.store.merge_sync_job(tenant, id, fields).await?;
        info!("Cancellation requested for sync job {}", id);
        Ok(())
    }

    pub async fn cancel_requested(&self, tenant: &TenantId, id: &JobId) -> SyncResult<bool> {
        Ok(self.get(tenant, id).await?.cancel_requested)
    }

    /// Jobs for a tenant, newest first
    pub async fn history(&self, tenant: &TenantId, limit: usize) -> SyncResult<Vec<SyncJob>> {
        let mut jobs = self.store.list_sync_jobs(tenant).await?;
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Most recent job, optionally for one source
    pub async fn last(&self, tenant: &TenantId, source: Option<Source>) -> SyncResult<Option<SyncJob>> {
        let jobs = self.store.list_sync_jobs(tenant).await?;
        Ok(jobs
            .into_iter()
            .find(|job| source.is_none_or(|s| job.source == s)))
    }

    async fn transition(
        &self,
        tenant: &TenantId,
        id: &JobId,
        next: JobStatus,
        mut fields: Fields,
    ) -> SyncResult<()> {
        let _guard = self.writes.lock().await;
        let job = self.get(tenant, id).await?;
        if job.status.is_terminal() {
            return Err(SyncError::JobTerminal(id.clone(), job.status));
        }
        if !job.status.can_transition_to(next) {
            return Err(SyncError::InvalidTransition(id.clone(), job.status, next));
        }
        fields.insert("status".into(), json!(next));
        self.store.merge_sync_job(tenant, id, fields).await?;
        Ok(())
    }
}
