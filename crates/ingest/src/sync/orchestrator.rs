//! Sync orchestration
//!
//! Drives one (tenant, source) job from pending to a terminal status. Pages
//! are processed strictly in order; the cursor is advanced only after a
//! page's writes have been attempted, so a crash replays at most one page.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;

use super::retry::{RetryPolicy, with_retry};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::jobs::JobTracker;
use crate::models::{
    AccessToken, Cursor, JobCounters, Source, SyncJob, SyncMode, TenantId,
};
use crate::provider::{ChangePage, Provider, RangePage};
use crate::reconcile::{PageOutcome, Reconciler};
use crate::storage::SyncStore;
use crate::token::{TokenEndpoint, TokenManager};

/// Running totals for one job
#[derive(Debug, Default)]
struct Progress {
    totals: JobCounters,
    last_error: Option<String>,
}

impl Progress {
    fn absorb(&mut self, outcome: PageOutcome) {
        self.totals.absorb(&outcome.counters);
        if outcome.last_error.is_some() {
            self.last_error = outcome.last_error;
        }
    }
}

/// Runs sync jobs against one provider and one store
pub struct SyncOrchestrator {
    config: SyncConfig,
    store: Arc<dyn SyncStore>,
    provider: Arc<dyn Provider>,
    tokens: TokenManager,
    jobs: JobTracker,
    retry: RetryPolicy,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn SyncStore>,
        provider: Arc<dyn Provider>,
        token_endpoint: Arc<dyn TokenEndpoint>,
    ) -> Self {
        let tokens = TokenManager::new(store.clone(), token_endpoint, config.token_expiry_margin());
        let jobs = JobTracker::new(store.clone());
        let retry = RetryPolicy::from(&config);

        Self {
            config,
            store,
            provider,
            tokens,
            jobs,
            retry,
        }
    }

    pub fn jobs(&self) -> &JobTracker {
        &self.jobs
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Create a job and run it to completion
    pub async fn sync(&self, tenant: &TenantId, source: Source, mode: SyncMode) -> SyncResult<SyncJob> {
        let job = self.jobs.create(tenant, source, mode).await?;
        self.run(&job).await
    }

    /// Run a pending job until it is complete or failed
    ///
    /// Fatal sync conditions end the job in `error` and are returned as the
    /// job's state, not as `Err`. `Err` means the job itself could not be
    /// tracked.
    pub async fn run(&self, job: &SyncJob) -> SyncResult<SyncJob> {
        let tenant = &job.tenant_id;
        info!(
            "Starting {} sync job {} for tenant {} ({:?})",
            job.source, job.id, tenant, job.mode
        );

        self.jobs.mark_running(tenant, &job.id).await?;

        let mut progress = Progress::default();
        let result = match &job.mode {
            SyncMode::Incremental => self.run_changes(job, false, &mut progress).await,
            SyncMode::FullResync => self.run_changes(job, true, &mut progress).await,
            SyncMode::Window { start, end } => {
                self.run_window(job, *start, *end, &mut progress).await
            }
        };

        match result {
            Ok(()) => self.jobs.complete(tenant, &job.id).await?,
            Err(err) => {
                error!("Sync job {} for tenant {} failed: {}", job.id, tenant, err);
                if err.requires_reauthorization() {
                    warn!("Tenant {} must grant access again before the next sync", tenant);
                }
                // Keep whatever progress the last page made before the failure
                if let Err(e) = self
                    .jobs
                    .record_page(tenant, &job.id, &progress.totals, progress.last_error.as_deref())
                    .await
                {
                    warn!("Could not record partial counters for job {}: {}", job.id, e);
                }
                self.jobs.fail(tenant, &job.id, &err.to_string()).await?;
            }
        }

        self.jobs.get(tenant, &job.id).await
    }

    /// Walk the change feed from the stored cursor
    async fn run_changes(&self, job: &SyncJob, reset: bool, progress: &mut Progress) -> SyncResult<()> {
        let tenant = &job.tenant_id;
        let source = job.source;

        if reset {
            info!("Clearing {} cursor for tenant {} (full resync)", source, tenant);
            self.store.clear_cursor(tenant, source).await?;
        }
        let mut cursor = self.store.get_cursor(tenant, source).await?;
        let page_size = self.config.page_size();

        loop {
            // 1. Stop between pages if asked to
            self.check_cancelled(job).await?;

            // 2. Token + fetch, retried as one unit
            let page: ChangePage = self
                .fetch_with_token(tenant, "list changes", |token| {
                    let cursor = cursor.clone();
                    let provider = self.provider.clone();
                    async move {
                        provider
                            .list_changes(&token, source, cursor.as_ref(), page_size)
                            .await
                    }
                })
                .await?;

            if page.has_more && page.next_cursor.is_none() {
                return Err(SyncError::ProviderProtocol(
                    "page reports more data but no next cursor".into(),
                ));
            }
            if page.has_more && page.next_cursor == cursor {
                return Err(SyncError::ProviderProtocol("cursor did not advance".into()));
            }

            // 3. Reconcile the page
            let outcome = Reconciler::new(self.store.as_ref())
                .reconcile_page(tenant, source, &page.records, &page.rejected, Utc::now())
                .await;
            progress.absorb(outcome);

            // 4. Advance the cursor now that the page's writes are done
            if let Some(next) = page.next_cursor {
                self.store.set_cursor(tenant, source, &next).await?;
                cursor = Some(next);
            }

            // 5. Publish counters
            self.jobs
                .record_page(tenant, &job.id, &progress.totals, progress.last_error.as_deref())
                .await?;
            debug!(
                "Job {} page {} done: {} processed so far",
                job.id, progress.totals.pages, progress.totals.processed
            );

            if !page.has_more {
                return Ok(());
            }
        }
    }

    /// Read one bounded window; the cursor is left alone
    async fn run_window(
        &self,
        job: &SyncJob,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
        progress: &mut Progress,
    ) -> SyncResult<()> {
        let tenant = &job.tenant_id;
        let source = job.source;
        if start >= end {
            return Err(SyncError::ProviderProtocol(format!(
                "empty window {} .. {}",
                start, end
            )));
        }

        self.check_cancelled(job).await?;

        let page: RangePage = self
            .fetch_with_token(tenant, "list in range", |token| {
                let provider = self.provider.clone();
                async move { provider.list_in_range(&token, source, start, end).await }
            })
            .await?;

        let outcome = Reconciler::new(self.store.as_ref())
            .reconcile_page(tenant, source, &page.records, &page.rejected, Utc::now())
            .await;
        progress.absorb(outcome);

        self.jobs
            .record_page(tenant, &job.id, &progress.totals, progress.last_error.as_deref())
            .await
    }

    async fn check_cancelled(&self, job: &SyncJob) -> SyncResult<()> {
        if self.jobs.cancel_requested(&job.tenant_id, &job.id).await? {
            info!("Sync job {} cancelled", job.id);
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    /// Get a token and run one provider call under the request timeout,
    /// retrying retryable failures
    async fn fetch_with_token<T, F, Fut>(&self, tenant: &TenantId, what: &str, call: F) -> SyncResult<T>
    where
        F: Fn(AccessToken) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let timeout = self.config.request_timeout();
        let call = &call;
        with_retry(&self.retry, what, move |_attempt| async move {
            let token = self.tokens.get_access_token(tenant).await?;
            let result = match tokio::time::timeout(timeout, call(token)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(timeout)),
            };
            if let Err(SyncError::TransientAuth(reason)) = &result {
                // The provider refused a token the cache still trusted
                debug!("Dropping cached token for tenant {}: {}", tenant, reason);
                self.tokens.invalidate_cached_token(tenant).await?;
            }
            result
        })
        .await
    }

    /// Persisted cursor for a tenant and source
    pub async fn cursor(&self, tenant: &TenantId, source: Source) -> SyncResult<Option<Cursor>> {
        Ok(self.store.get_cursor(tenant, source).await?)
    }
}
