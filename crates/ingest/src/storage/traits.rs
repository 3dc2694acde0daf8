//! Storage trait definitions

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::merge::Fields;
use super::path::{CollectionPath, DocPath};
use crate::models::{Credential, Cursor, JobId, Source, SyncJob, SyncSettings, TenantId};

/// Trait for the hierarchical per-tenant document store
///
/// Backends implement three primitives; every pipeline-level operation is a
/// provided method on top of them. `merge_document` must be a blind upsert:
/// it may not require the caller to read the document first, and applying
/// the same fields twice must leave the document unchanged.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Read one document
    async fn get_document(&self, path: &DocPath) -> Result<Option<Value>>;

    /// Merge fields into a document, creating it if absent
    async fn merge_document(&self, path: &DocPath, fields: Fields) -> Result<()>;

    /// List the documents directly inside a collection
    async fn list_documents(&self, collection: &CollectionPath) -> Result<Vec<(DocPath, Value)>>;

    // === Credentials ===

    /// Get the tenant's stored credential
    async fn get_credential(&self, tenant: &TenantId) -> Result<Option<Credential>> {
        let path = DocPath::credential(tenant);
        match self.get_document(&path).await? {
            Some(value) => Ok(Some(decode(&path, value)?)),
            None => Ok(None),
        }
    }

    /// Merge fields into the tenant's credential (never destructive)
    async fn merge_credential(&self, tenant: &TenantId, fields: Fields) -> Result<()> {
        self.merge_document(&DocPath::credential(tenant), fields).await
    }

    // === Natural-key documents (contacts, threads, events, children) ===

    /// Look up a document by its natural key
    async fn get_by_natural_key(
        &self,
        collection: &CollectionPath,
        natural_key: &str,
    ) -> Result<Option<Value>> {
        self.get_document(&collection.doc(natural_key)).await
    }

    /// Upsert a document keyed by its natural key, with no precondition read
    async fn merge_by_natural_key(
        &self,
        collection: &CollectionPath,
        natural_key: &str,
        fields: Fields,
    ) -> Result<()> {
        self.merge_document(&collection.doc(natural_key), fields)
            .await
    }

    // === Sync jobs ===

    /// Merge fields into a sync job row
    async fn merge_sync_job(&self, tenant: &TenantId, job_id: &JobId, fields: Fields) -> Result<()> {
        let path = CollectionPath::sync_jobs(tenant).doc(job_id.as_str());
        self.merge_document(&path, fields).await
    }

    /// Get a sync job by id
    async fn get_sync_job(&self, tenant: &TenantId, job_id: &JobId) -> Result<Option<SyncJob>> {
        let path = CollectionPath::sync_jobs(tenant).doc(job_id.as_str());
        match self.get_document(&path).await? {
            Some(value) => Ok(Some(decode(&path, value)?)),
            None => Ok(None),
        }
    }

    /// List the tenant's sync jobs, newest first
    async fn list_sync_jobs(&self, tenant: &TenantId) -> Result<Vec<SyncJob>> {
        let docs = self.list_documents(&CollectionPath::sync_jobs(tenant)).await?;
        let mut jobs = docs
            .into_iter()
            .map(|(path, value)| decode::<SyncJob>(&path, value))
            .collect::<Result<Vec<_>>>()?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    // === Cursors ===

    /// Get the tenant's sync settings (all cursors)
    async fn get_sync_settings(&self, tenant: &TenantId) -> Result<SyncSettings> {
        let path = DocPath::sync_settings(tenant);
        match self.get_document(&path).await? {
            Some(value) => decode(&path, value),
            None => Ok(SyncSettings::default()),
        }
    }

    /// Get the cursor for one source
    async fn get_cursor(&self, tenant: &TenantId, source: Source) -> Result<Option<Cursor>> {
        Ok(self.get_sync_settings(tenant).await?.cursor(source).cloned())
    }

    /// Persist the cursor for one source
    async fn set_cursor(&self, tenant: &TenantId, source: Source, cursor: &Cursor) -> Result<()> {
        let fields = json!({
            "cursors": { source.as_str(): cursor.as_str() },
            "cursor_updated_at": { source.as_str(): Utc::now() },
        });
        self.merge_document(&DocPath::sync_settings(tenant), into_fields(fields))
            .await
    }

    /// Remove the cursor for one source (explicit full-resync reset)
    async fn clear_cursor(&self, tenant: &TenantId, source: Source) -> Result<()> {
        let fields = json!({
            "cursors": { source.as_str(): null },
            "cursor_updated_at": { source.as_str(): Utc::now() },
        });
        self.merge_document(&DocPath::sync_settings(tenant), into_fields(fields))
            .await
    }
}

/// Decode a stored document into a typed model
pub fn decode<T: DeserializeOwned>(path: &DocPath, value: Value) -> Result<T> {
    serde_json::from_value(value).with_context(|| format!("Malformed document at {}", path))
}

/// Unwrap a `json!` object literal into a field set
pub(crate) fn into_fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}
