//! Provider wire types
//!
//! Envelopes are typed; items stay as raw JSON until normalization decides
//! which shape they have.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Response from the changes endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesResponse {
    #[serde(default)]
    pub items: Vec<Value>,
    pub next_page_cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

/// Response from the time-ranged list endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeResponse {
    #[serde(default)]
    pub items: Vec<Value>,
}

/// Mail thread item
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireThread {
    pub id: String,
    pub subject: Option<String>,
    pub snippet: Option<String>,
    pub messages: Vec<WireMessage>,
}

/// Message inside a thread item
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireMessage {
    pub id: String,
    /// Milliseconds since epoch, sent as a string
    pub internal_date: String,
    pub from: Option<String>,
    /// Comma-separated recipient list
    pub to: Option<String>,
    pub snippet: Option<String>,
    pub label_ids: Option<Vec<String>>,
}

/// Calendar event item
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireEvent {
    pub id: String,
    pub summary: Option<String>,
    pub status: Option<String>,
    pub organizer: Option<WirePerson>,
    pub attendees: Option<Vec<WirePerson>>,
    pub start: WireTime,
    pub end: Option<WireTime>,
    /// Expanded instances of a recurring event
    pub instances: Option<Vec<WireInstance>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WirePerson {
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "self", default)]
    pub is_self: bool,
    #[serde(default)]
    pub resource: bool,
}

/// Either a timestamp or an all-day date
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireTime {
    pub date_time: Option<DateTime<Utc>>,
    pub date: Option<NaiveDate>,
}

impl WireTime {
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        self.date_time.or_else(|| {
            self.date
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireInstance {
    pub id: String,
    pub start: WireTime,
    pub end: Option<WireTime>,
    pub status: Option<String>,
}
