//! External mailbox/calendar provider integration
//!
//! This module provides:
//! - The `Provider` trait the orchestrator drives
//! - An HTTP client for the provider's change and range endpoints
//! - OAuth2 token-endpoint access
//! - Normalization of raw provider items into a small set of record kinds

mod api;
mod auth;
mod client;
mod normalize;

pub use api::{ChangesResponse, RangeResponse};
pub use auth::OAuthClient;
pub use client::HttpProvider;
pub use normalize::{normalize_item, normalize_items, parse_retry_after};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SyncResult;
use crate::models::{AccessToken, Cursor, EmailAddress, Source};

/// A provider record, already mapped out of the provider's wire shape
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderRecord {
    ThreadChanged(ThreadRecord),
    EventChanged(EventRecord),
    Deleted(DeletedRecord),
}

impl ProviderRecord {
    pub fn external_id(&self) -> &str {
        match self {
            ProviderRecord::ThreadChanged(t) => &t.external_id,
            ProviderRecord::EventChanged(e) => &e.external_id,
            ProviderRecord::Deleted(d) => &d.external_id,
        }
    }

    pub fn source(&self) -> Source {
        match self {
            ProviderRecord::ThreadChanged(_) => Source::Mail,
            ProviderRecord::EventChanged(_) => Source::Calendar,
            ProviderRecord::Deleted(d) => d.source,
        }
    }

    /// The counterpart this record should be linked to, if one was found
    pub fn participant(&self) -> Option<&EmailAddress> {
        match self {
            ProviderRecord::ThreadChanged(t) => t.participant.as_ref(),
            ProviderRecord::EventChanged(e) => e.participant.as_ref(),
            ProviderRecord::Deleted(_) => None,
        }
    }
}

/// A changed mail thread with the messages the provider returned for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadRecord {
    pub external_id: String,
    pub subject: String,
    pub snippet: String,
    pub participant: Option<EmailAddress>,
    pub messages: Vec<MessageRecord>,
}

impl ThreadRecord {
    /// Time of the newest message
    pub fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().map(|m| m.sent_at).max()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageRecord {
    pub external_id: String,
    pub sent_at: DateTime<Utc>,
    pub from: Option<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub snippet: String,
    pub labels: Vec<String>,
}

/// A changed calendar event with its occurrences
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub external_id: String,
    pub title: String,
    pub status: Option<String>,
    pub participant: Option<EmailAddress>,
    pub occurrences: Vec<OccurrenceRecord>,
}

impl EventRecord {
    /// Start of the latest occurrence
    pub fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        self.occurrences.iter().map(|o| o.starts_at).max()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccurrenceRecord {
    pub external_id: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
}

/// A thread or event the provider reports as removed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletedRecord {
    pub source: Source,
    pub external_id: String,
}

/// A raw item that could not be mapped to any record kind
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedItem {
    pub external_id: Option<String>,
    pub reason: String,
}

/// One page of an incremental listing
#[derive(Debug, Clone, Default)]
pub struct ChangePage {
    pub records: Vec<ProviderRecord>,
    pub rejected: Vec<RejectedItem>,
    /// Position after this page; `None` keeps the current cursor
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
}

/// Items inside a bounded time window
#[derive(Debug, Clone, Default)]
pub struct RangePage {
    pub records: Vec<ProviderRecord>,
    pub rejected: Vec<RejectedItem>,
}

/// The external mailbox/calendar service
///
/// Implementations must report throttling as `SyncError::RateLimited` so the
/// orchestrator can pause and resume instead of abandoning the job.
#[async_trait]
pub trait Provider: Send + Sync {
    /// List changes after `cursor` (from the beginning when `None`)
    async fn list_changes(
        &self,
        token: &AccessToken,
        source: Source,
        cursor: Option<&Cursor>,
        page_size: usize,
    ) -> SyncResult<ChangePage>;

    /// List items whose activity falls inside `[start, end)`
    async fn list_in_range(
        &self,
        token: &AccessToken,
        source: Source,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SyncResult<RangePage>;
}
