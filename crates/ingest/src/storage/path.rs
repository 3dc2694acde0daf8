//! Hierarchical document paths
//!
//! Every path starts with `tenant/{tenant}`; keys are percent-encoded so a
//! natural key (an address, a provider id) can never add a path segment.

use std::fmt;

use crate::models::TenantId;

/// Encode a natural key for use as a single path segment
pub fn encode_key(key: &str) -> String {
    urlencoding::encode(key).into_owned()
}

/// Decode a path segment back into the natural key
pub fn decode_key(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// Path of a collection of documents
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Top-level collection inside a tenant namespace
    pub fn tenant(tenant: &TenantId, name: &str) -> Self {
        Self(format!("tenant/{}/{}", encode_key(tenant.as_str()), name))
    }

    /// Sub-collection under the document `key` of this collection
    pub fn child(&self, key: &str, name: &str) -> Self {
        Self(format!("{}/{}/{}", self.0, encode_key(key), name))
    }

    /// Document `key` within this collection
    pub fn doc(&self, key: &str) -> DocPath {
        DocPath(format!("{}/{}", self.0, encode_key(key)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn contacts(tenant: &TenantId) -> Self {
        Self::tenant(tenant, "contacts")
    }

    pub fn sync_jobs(tenant: &TenantId) -> Self {
        Self::tenant(tenant, "sync_jobs")
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a single document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

impl DocPath {
    /// Rebuild a path read back from a backend
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The tenant's stored OAuth credential
    pub fn credential(tenant: &TenantId) -> Self {
        CollectionPath::tenant(tenant, "private").doc("credential")
    }

    /// The tenant's sync settings (cursors)
    pub fn sync_settings(tenant: &TenantId) -> Self {
        CollectionPath::tenant(tenant, "settings").doc("sync")
    }

    /// Collection this document belongs to
    pub fn collection(&self) -> &str {
        self.0.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
    }

    /// Decoded natural key of this document
    pub fn key(&self) -> String {
        decode_key(self.0.rsplit('/').next().unwrap_or(""))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
