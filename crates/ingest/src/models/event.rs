//! Calendar event and occurrence documents written by the reconciler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ContactId, EmailAddress};

/// A calendar event as stored under `tenant/{id}/events/{key}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Provider event id (natural key)
    pub external_id: String,
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    #[serde(default)]
    pub state_hash: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub participant: Option<EmailAddress>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub occurrence_count: usize,
    #[serde(default)]
    pub deleted: bool,
    pub synced_at: DateTime<Utc>,
}

/// One instance of an event under `tenant/{id}/events/{key}/occurrences/{key}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub external_id: String,
    pub event_id: String,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<String>,
}
