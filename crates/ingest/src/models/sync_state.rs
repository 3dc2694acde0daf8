//! Per-tenant sync settings holding the provider cursors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::Source;

/// Opaque provider-issued position: everything before it has been processed
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(pub String);

impl Cursor {
    pub fn new(cursor: impl Into<String>) -> Self {
        Self(cursor.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Cursors can be long; keep log lines readable
        if self.0.chars().count() > 24 {
            let head: String = self.0.chars().take(24).collect();
            write!(f, "Cursor({}…)", head)
        } else {
            write!(f, "Cursor({})", self.0)
        }
    }
}

/// Sync settings stored at `tenant/{id}/settings/sync`
///
/// One cursor per source; a cursor only moves forward after a page's
/// writes have been applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub cursors: BTreeMap<String, Cursor>,
    #[serde(default)]
    pub cursor_updated_at: BTreeMap<String, DateTime<Utc>>,
}

impl SyncSettings {
    pub fn cursor(&self, source: Source) -> Option<&Cursor> {
        self.cursors.get(source.as_str())
    }

    pub fn cursor_updated_at(&self, source: Source) -> Option<DateTime<Utc>> {
        self.cursor_updated_at.get(source.as_str()).copied()
    }
}
