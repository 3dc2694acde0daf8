//! Tenant identity and source kinds

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a tenant (one end-user account)
///
/// Every document the pipeline touches lives under `tenant/{id}/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// External source type handled by one sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Mail,
    Calendar,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Mail => "mail",
            Source::Calendar => "calendar",
        }
    }

    /// Collection holding this source's containers (threads or events)
    pub fn container_collection(&self) -> &'static str {
        match self {
            Source::Mail => "threads",
            Source::Calendar => "events",
        }
    }

    /// Child collection under each container (messages or occurrences)
    pub fn child_collection(&self) -> &'static str {
        match self {
            Source::Mail => "messages",
            Source::Calendar => "occurrences",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mail" | "mailbox" | "email" => Ok(Source::Mail),
            "calendar" | "events" => Ok(Source::Calendar),
            other => Err(format!("unknown source: {}", other)),
        }
    }
}
