//! In-memory storage implementation
//!
//! Used for tests and local experiments. Besides the documents themselves it
//! records how many reads and writes reached it, which collections were
//! written, and can be told to fail writes to simulate a flaky backend.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use super::merge::{Fields, merge_patch};
use super::path::{CollectionPath, DocPath};
use super::traits::SyncStore;

/// In-memory implementation of SyncStore
///
/// Documents live in a BTreeMap keyed by full path, so listing a collection
/// is a range scan over its prefix.
#[derive(Default)]
pub struct InMemorySyncStore {
    docs: RwLock<BTreeMap<String, Value>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    /// Paths written, in order
    write_log: Mutex<Vec<String>>,
    /// Writes to a path containing any of these fragments fail
    failing_paths: RwLock<Vec<String>>,
}

impl InMemorySyncStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of document reads served (gets and list entries)
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful merges applied
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of successful merges into documents directly inside `collection`
    pub fn writes_to(&self, collection: &CollectionPath) -> usize {
        let log = self.write_log.lock().map(|l| l.clone()).unwrap_or_default();
        log.iter()
            .filter(|path| DocPath::from_raw(path.as_str()).collection() == collection.as_str())
            .count()
    }

    /// Reset read/write counters and the write log
    pub fn reset_counters(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
        if let Ok(mut log) = self.write_log.lock() {
            log.clear();
        }
    }

    /// Make every write to a path containing `fragment` fail
    pub fn fail_writes_containing(&self, fragment: impl Into<String>) {
        if let Ok(mut failing) = self.failing_paths.write() {
            failing.push(fragment.into());
        }
    }

    /// Stop injecting write failures
    pub fn clear_write_failures(&self) {
        if let Ok(mut failing) = self.failing_paths.write() {
            failing.clear();
        }
    }

    /// Number of documents directly inside `collection` (not counted as a read)
    pub fn document_count(&self, collection: &CollectionPath) -> usize {
        self.docs
            .read()
            .map(|docs| {
                docs.keys()
                    .filter(|path| DocPath::from_raw(path.as_str()).collection() == collection.as_str())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Copy of every stored document (not counted as a read)
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.docs.read().map(|docs| docs.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SyncStore for InMemorySyncStore {
    async fn get_document(&self, path: &DocPath) -> Result<Option<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let docs = self.docs.read().map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(docs.get(path.as_str()).cloned())
    }

    async fn merge_document(&self, path: &DocPath, fields: Fields) -> Result<()> {
        {
            let failing = self
                .failing_paths
                .read()
                .map_err(|_| anyhow!("store lock poisoned"))?;
            if let Some(fragment) = failing.iter().find(|f| path.as_str().contains(f.as_str())) {
                anyhow::bail!("injected write failure for {} (matched {:?})", path, fragment);
            }
        }

        let mut docs = self.docs.write().map_err(|_| anyhow!("store lock poisoned"))?;
        let doc = docs.entry(path.as_str().to_string()).or_insert(Value::Null);
        merge_patch(doc, &Value::Object(fields));
        drop(docs);

        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.write_log.lock() {
            log.push(path.as_str().to_string());
        }
        Ok(())
    }

    async fn list_documents(&self, collection: &CollectionPath) -> Result<Vec<(DocPath, Value)>> {
        let docs = self.docs.read().map_err(|_| anyhow!("store lock poisoned"))?;
        let prefix = format!("{}/", collection.as_str());

        let result: Vec<(DocPath, Value)> = docs
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .map(|(path, value)| (DocPath::from_raw(path.as_str()), value.clone()))
            .collect();

        self.reads.fetch_add(result.len().max(1), Ordering::SeqCst);
        Ok(result)
    }
}
