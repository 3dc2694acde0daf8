//! Thread and message documents written by the reconciler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ContactId, EmailAddress};

/// A mail conversation as stored under `tenant/{id}/threads/{key}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    /// Provider thread id (natural key)
    pub external_id: String,
    /// Linked contact, absent until a participant is resolved
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    /// Hash of the mutable fields at the time of the last write
    #[serde(default)]
    pub state_hash: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub participant: Option<EmailAddress>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: usize,
    /// Set when the provider reported the thread deleted
    #[serde(default)]
    pub deleted: bool,
    pub synced_at: DateTime<Utc>,
}

/// A single message under `tenant/{id}/threads/{key}/messages/{key}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub external_id: String,
    pub thread_id: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub from: Option<EmailAddress>,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Thread {
    /// Subject shown for threads with an empty subject line
    pub const NO_SUBJECT: &'static str = "(no subject)";
}
