//! Ingest crate - mailbox and calendar ingestion for Touchpoint tenants
//!
//! This crate pulls changed threads and events from an external provider and
//! reconciles them into a per-tenant document store:
//! - Domain models (Contact, Thread, Event, SyncJob, Cursor)
//! - Access-token management over stored OAuth credentials
//! - Provider HTTP client with record normalization
//! - Contact resolution by normalized address
//! - Page reconciliation with blind, idempotent upserts
//! - Job tracking and the page-by-page sync orchestrator
//!
//! Storage is behind the [`SyncStore`] trait, with in-memory and SQLite
//! backends.

pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod provider;
pub mod reconcile;
pub mod resolver;
pub mod storage;
pub mod sync;
pub mod token;

pub use config::{ProviderCredentials, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use jobs::JobTracker;
pub use models::{
    AccessToken, Contact, ContactId, Cursor, EmailAddress, JobCounters, JobId, JobStatus, Source,
    SyncJob, SyncMode, TenantId,
};
pub use provider::{
    ChangePage, HttpProvider, OAuthClient, Provider, ProviderRecord, RangePage, RejectedItem,
};
pub use reconcile::{PageOutcome, Reconciler};
pub use resolver::{ContactResolver, PageResolver, Resolution};
pub use storage::{InMemorySyncStore, SqliteSyncStore, SyncStore};
pub use sync::{RetryPolicy, SyncOrchestrator, SyncService};
pub use token::{TokenEndpoint, TokenManager};
