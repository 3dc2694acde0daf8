//! Sync job lifecycle records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Source, TenantId};

/// Unique identifier for one pipeline invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a fresh random job id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job status: `pending -> running -> {complete, error}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Error)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Error) | (Running, Complete) | (Running, Error)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a job walks the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncMode {
    /// Resume from the stored cursor
    Incremental,
    /// Clear the cursor and re-read everything
    FullResync,
    /// Read a bounded time window; the cursor is left untouched
    Window {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Progress counters accumulated across pages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    #[serde(default)]
    pub pages: u64,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub errors: u64,
    #[serde(default)]
    pub contacts_created: u64,
    #[serde(default)]
    pub contacts_upserted: u64,
    #[serde(default)]
    pub items_upserted: u64,
    #[serde(default)]
    pub unlinked: u64,
}

impl JobCounters {
    /// Add another set of counters onto this one
    pub fn absorb(&mut self, other: &JobCounters) {
        self.pages += other.pages;
        self.processed += other.processed;
        self.errors += other.errors;
        self.contacts_created += other.contacts_created;
        self.contacts_upserted += other.contacts_upserted;
        self.items_upserted += other.items_upserted;
        self.unlinked += other.unlinked;
    }
}

/// One sync invocation as stored under `tenant/{id}/sync_jobs/{job}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: JobId,
    pub tenant_id: TenantId,
    pub source: Source,
    pub mode: SyncMode,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub counters: JobCounters,
    /// Most recent non-fatal record failure
    #[serde(default)]
    pub last_error: Option<String>,
    /// Fatal condition that ended the job
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub cancel_requested: bool,
}

impl SyncJob {
    /// Create a pending job
    pub fn pending(tenant_id: TenantId, source: Source, mode: SyncMode) -> Self {
        Self {
            id: JobId::generate(),
            tenant_id,
            source,
            mode,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            counters: JobCounters::default(),
            last_error: None,
            error_message: None,
            cancel_requested: false,
        }
    }

    /// Wall-clock duration of a finished job
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at.unwrap_or(self.created_at))
    }
}
