//! Contact model and participant address handling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unique identifier for a contact
///
/// Equal to the normalized primary address, so the id doubles as the
/// natural key the store writes under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactId(pub String);

impl ContactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Parse an email address from a string like "John Doe <john@example.com>"
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim().trim_matches('"').trim();
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                email: email.to_string(),
            };
        }

        Self {
            name: None,
            email: s.to_string(),
        }
    }

    /// Normalized form of the address, or `None` if it is not usable as a key
    pub fn normalized(&self) -> Option<String> {
        normalize_address(&self.email)
    }
}

/// Normalize an address into its natural-key form
///
/// Lowercases, strips a `mailto:` prefix and surrounding brackets, and
/// rejects anything that does not look like `local@domain`.
pub fn normalize_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('<').trim_end_matches('>').trim();
    let lowered = trimmed.to_lowercase();
    let addr = lowered.strip_prefix("mailto:").unwrap_or(&lowered);

    let (local, domain) = addr.split_once('@')?;
    if local.is_empty()
        || domain.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || addr.chars().any(char::is_whitespace)
    {
        return None;
    }

    Some(addr.to_string())
}

/// Split a display name into (first, last) parts
pub fn split_display_name(name: &str) -> (Option<String>, Option<String>) {
    let name = name.trim();
    if name.is_empty() {
        return (None, None);
    }

    // "Doe, Jane" ordering
    if let Some((last, first)) = name.split_once(',') {
        let first = first.trim();
        let last = last.trim();
        return (
            (!first.is_empty()).then(|| first.to_string()),
            (!last.is_empty()).then(|| last.to_string()),
        );
    }

    match name.rsplit_once(' ') {
        Some((first, last)) => (
            Some(first.trim().to_string()),
            Some(last.trim().to_string()),
        ),
        None => (Some(name.to_string()), None),
    }
}

/// A CRM contact as stored under `tenant/{id}/contacts/{key}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// Normalized primary address (natural key)
    pub primary_address: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    /// Related items keyed by `{source}:{external id}`, valued by last activity
    ///
    /// Counters are derived from this map so that replaying a page never
    /// inflates them.
    #[serde(default)]
    pub linked_items: BTreeMap<String, DateTime<Utc>>,
    /// Where the contact came from (e.g. "mail", "calendar", "manual")
    #[serde(default)]
    pub origin: Option<String>,
}

impl Contact {
    /// Identifier of this contact
    pub fn id(&self) -> ContactId {
        ContactId::new(self.primary_address.clone())
    }

    /// Number of threads/events linked to this contact
    pub fn related_item_count(&self) -> usize {
        self.linked_items.len()
    }

    /// Most recent activity across all linked items
    pub fn last_interaction_at(&self) -> Option<DateTime<Utc>> {
        self.linked_items.values().max().copied()
    }
}

/// Key used in a contact's `linked_items` map
pub fn linked_item_key(source: crate::models::Source, external_id: &str) -> String {
    format!("{}:{}", source.as_str(), external_id)
}
