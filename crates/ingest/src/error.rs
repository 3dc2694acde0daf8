//! Error taxonomy for the ingestion pipeline

use std::time::Duration;

use crate::models::{JobId, JobStatus, TenantId};

/// Errors produced while syncing a tenant
///
/// Retryable conditions (`TransientAuth`, `RateLimited`, `Timeout`, provider
/// 5xx) are retried by the orchestrator up to the configured ceiling and then
/// wrapped in `RetriesExhausted`. `RecordWrite` never ends a job; it is
/// absorbed by the reconciler and only shows up in the job counters.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("auth revoked: {0} (tenant must re-authorize)")]
    AuthRevoked(String),

    #[error("auth revoked: no credential stored for tenant {0}")]
    CredentialMissing(TenantId),

    #[error("transient auth error: {0}")]
    TransientAuth(String),

    #[error("rate limited by provider, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("provider request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("provider cursor expired; a full resync is required")]
    CursorExpired,

    #[error("provider protocol error: {0}")]
    ProviderProtocol(String),

    #[error("provider error {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("failed to write record {external_id}: {message}")]
    RecordWrite { external_id: String, message: String },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<SyncError> },

    #[error("job cancelled by request")]
    Cancelled,

    #[error("job {0} is already {1}")]
    JobTerminal(JobId, JobStatus),

    #[error("job {0} cannot move from {1} to {2}")]
    InvalidTransition(JobId, JobStatus, JobStatus),

    #[error("job {0} not found")]
    JobNotFound(JobId),
}

impl SyncError {
    /// Whether the orchestrator may retry the operation that produced this
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::TransientAuth(_)
            | SyncError::RateLimited { .. }
            | SyncError::Timeout(_)
            | SyncError::Network(_) => true,
            SyncError::Provider { status, .. } => *status == 408 || *status >= 500,
            _ => false,
        }
    }

    /// Whether this condition ends the job
    ///
    /// Record-level write failures are absorbed by the page; retryable
    /// conditions only become fatal once wrapped in `RetriesExhausted`.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::RecordWrite { .. }) && !self.is_retryable()
    }

    /// Delay requested by the provider, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether this condition means the tenant has to grant access again
    pub fn requires_reauthorization(&self) -> bool {
        match self {
            SyncError::AuthRevoked(_) | SyncError::CredentialMissing(_) => true,
            SyncError::RetriesExhausted { last, .. } => last.requires_reauthorization(),
            _ => false,
        }
    }
}

/// Result alias used throughout the pipeline
pub type SyncResult<T> = std::result::Result<T, SyncError>;
