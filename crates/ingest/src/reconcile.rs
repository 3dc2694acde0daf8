//! Page reconciliation
//!
//! Turns one page of provider records into store writes. Every record is
//! written unconditionally as a merge keyed by its external id (no read
//! first), so replaying a page after a crash converges on the same state.
//! Contact reads happen only through the page-scoped resolver cache.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::error::SyncError;
use crate::models::{
    ContactId, Event, JobCounters, Message, Occurrence, Source, TenantId, Thread, linked_item_key,
};
use crate::provider::{DeletedRecord, EventRecord, ProviderRecord, RejectedItem, ThreadRecord};
use crate::resolver::PageResolver;
use crate::storage::{CollectionPath, Fields, SyncStore, to_fields};

/// What reconciling one page did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageOutcome {
    pub counters: JobCounters,
    /// Most recent record-level failure on this page
    pub last_error: Option<String>,
}

impl PageOutcome {
    fn record_error(&mut self, err: SyncError) {
        warn!("{}", err);
        self.counters.errors += 1;
        self.last_error = Some(err.to_string());
    }
}

/// Hash of a record's provider-side state
pub fn state_hash(record: &ProviderRecord) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(record)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// A record that passed resolution and is waiting for its container write
struct PlannedRecord<'r> {
    record: &'r ProviderRecord,
    hash: String,
    contact_id: Option<ContactId>,
    link_key: String,
}

fn last_activity_at(record: &ProviderRecord) -> Option<DateTime<Utc>> {
    match record {
        ProviderRecord::ThreadChanged(thread) => thread.last_activity_at(),
        ProviderRecord::EventChanged(event) => event.last_activity_at(),
        ProviderRecord::Deleted(_) => None,
    }
}

/// Writes provider records into a tenant's namespace
pub struct Reconciler<'a> {
    store: &'a dyn SyncStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn SyncStore) -> Self {
        Self { store }
    }

    /// Reconcile one page
    ///
    /// Never fails as a whole: record failures are counted and the rest of
    /// the page continues. The caller advances the cursor afterwards.
    ///
    /// Contacts are written before the threads and events that point at
    /// them. A record whose contact could not be written is stored
    /// unlinked, and a record that could not be written is removed from its
    /// contact's linked items again.
    pub async fn reconcile_page(
        &self,
        tenant: &TenantId,
        source: Source,
        records: &[ProviderRecord],
        rejected: &[RejectedItem],
        synced_at: DateTime<Utc>,
    ) -> PageOutcome {
        let mut outcome = PageOutcome::default();
        outcome.counters.pages = 1;
        let mut resolver = PageResolver::new(self.store, tenant, source);

        for reject in rejected {
            outcome.counters.processed += 1;
            outcome.record_error(SyncError::RecordWrite {
                external_id: reject.external_id.clone().unwrap_or_else(|| "<unknown>".into()),
                message: format!("rejected provider item: {}", reject.reason),
            });
        }

        // 1. Tombstones, hashes and contact resolution
        let mut planned = Vec::with_capacity(records.len());
        for record in records {
            outcome.counters.processed += 1;
            let external_id = record.external_id();

            if let ProviderRecord::Deleted(deleted) = record {
                match self.write_tombstone(tenant, deleted, synced_at).await {
                    Ok(()) => outcome.counters.items_upserted += 1,
                    Err(e) => outcome.record_error(record_write_error(external_id, e)),
                }
                continue;
            }

            let hash = match state_hash(record) {
                Ok(hash) => hash,
                Err(e) => {
                    outcome.record_error(record_write_error(external_id, e.into()));
                    continue;
                }
            };

            let resolution = match resolver.resolve(record.participant()).await {
                Ok(resolution) => resolution,
                Err(e) => {
                    outcome.record_error(record_write_error(
                        external_id,
                        anyhow::anyhow!("contact resolution failed: {}", e),
                    ));
                    continue;
                }
            };

            let contact_id = resolution.contact_id().cloned();
            let link_key = linked_item_key(record.source(), external_id);
            if let Some(contact) = &contact_id {
                let at = last_activity_at(record).unwrap_or(synced_at);
                resolver.link(contact, link_key.clone(), at);
            }
            planned.push(PlannedRecord {
                record,
                hash,
                contact_id,
                link_key,
            });
        }

        // 2. One merge per touched contact
        let contacts = CollectionPath::contacts(tenant);
        let mut unwritten_contacts = HashSet::new();
        for upsert in resolver.into_upserts() {
            match self
                .store
                .merge_by_natural_key(&contacts, upsert.contact_id.as_str(), upsert.fields)
                .await
            {
                Ok(()) => {
                    outcome.counters.contacts_upserted += 1;
                    if upsert.created {
                        outcome.counters.contacts_created += 1;
                    }
                }
                Err(e) => {
                    outcome.record_error(record_write_error(upsert.contact_id.as_str(), e));
                    if upsert.created {
                        unwritten_contacts.insert(upsert.contact_id);
                    }
                }
            }
        }

        // 3. Containers and their children
        for PlannedRecord {
            record,
            hash,
            contact_id,
            link_key,
        } in planned
        {
            let external_id = record.external_id();
            let contact_id = contact_id.filter(|id| !unwritten_contacts.contains(id));

            let written = match record {
                ProviderRecord::ThreadChanged(thread) => {
                    self.write_thread(tenant, thread, contact_id.as_ref(), hash, synced_at).await
                }
                ProviderRecord::EventChanged(event) => {
                    self.write_event(tenant, event, contact_id.as_ref(), hash, synced_at).await
                }
                ProviderRecord::Deleted(_) => continue,
            };

            match written {
                Ok(()) => {
                    outcome.counters.items_upserted += 1;
                    if contact_id.is_none() {
                        debug!("Record {} has no linked contact, stored unlinked", external_id);
                        outcome.counters.unlinked += 1;
                    }
                }
                Err(e) => {
                    outcome.record_error(record_write_error(external_id, e));
                    if let Some(contact) = &contact_id
                        && let Err(e) = self.unlink(&contacts, contact, &link_key).await
                    {
                        outcome.record_error(record_write_error(contact.as_str(), e));
                    }
                }
            }
        }

        debug!(
            "Reconciled {} page for tenant {}: {:?}",
            source, tenant, outcome.counters
        );
        outcome
    }

    /// Drop a linked item whose container never made it to the store
    async fn unlink(
        &self,
        contacts: &CollectionPath,
        contact: &ContactId,
        link_key: &str,
    ) -> anyhow::Result<()> {
        let mut linked = serde_json::Map::new();
        linked.insert(link_key.to_string(), serde_json::Value::Null);
        let mut fields = Fields::new();
        fields.insert("linked_items".into(), serde_json::Value::Object(linked));
        self.store
            .merge_by_natural_key(contacts, contact.as_str(), fields)
            .await
    }

    async fn write_thread(
        &self,
        tenant: &TenantId,
        record: &ThreadRecord,
        contact_id: Option<&ContactId>,
        state_hash: String,
        synced_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let threads = CollectionPath::tenant(tenant, Source::Mail.container_collection());
        let thread = Thread {
            external_id: record.external_id.clone(),
            contact_id: contact_id.cloned(),
            state_hash,
            subject: record.subject.clone(),
            snippet: record.snippet.clone(),
            participant: record.participant.clone(),
            last_activity_at: record.last_activity_at(),
            message_count: record.messages.len(),
            deleted: false,
            synced_at,
        };
        self.store
            .merge_by_natural_key(&threads, &record.external_id, container_fields(&thread)?)
            .await?;

        let messages = threads.child(&record.external_id, Source::Mail.child_collection());
        for message in &record.messages {
            let doc = Message {
                external_id: message.external_id.clone(),
                thread_id: record.external_id.clone(),
                sent_at: message.sent_at,
                from: message.from.clone(),
                snippet: message.snippet.clone(),
                labels: message.labels.clone(),
            };
            self.store
                .merge_by_natural_key(&messages, &message.external_id, to_fields(&doc)?)
                .await?;
        }
        Ok(())
    }

    async fn write_event(
        &self,
        tenant: &TenantId,
        record: &EventRecord,
        contact_id: Option<&ContactId>,
        state_hash: String,
        synced_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let events = CollectionPath::tenant(tenant, Source::Calendar.container_collection());
        let event = Event {
            external_id: record.external_id.clone(),
            contact_id: contact_id.cloned(),
            state_hash,
            title: record.title.clone(),
            status: record.status.clone(),
            participant: record.participant.clone(),
            last_activity_at: record.last_activity_at(),
            occurrence_count: record.occurrences.len(),
            deleted: false,
            synced_at,
        };
        self.store
            .merge_by_natural_key(&events, &record.external_id, container_fields(&event)?)
            .await?;

        let occurrences = events.child(&record.external_id, Source::Calendar.child_collection());
        for occurrence in &record.occurrences {
            let doc = Occurrence {
                external_id: occurrence.external_id.clone(),
                event_id: record.external_id.clone(),
                starts_at: occurrence.starts_at,
                ends_at: occurrence.ends_at,
                status: occurrence.status.clone(),
            };
            self.store
                .merge_by_natural_key(&occurrences, &occurrence.external_id, to_fields(&doc)?)
                .await?;
        }
        Ok(())
    }

    /// Mark a container deleted; children and contact links are kept
    async fn write_tombstone(
        &self,
        tenant: &TenantId,
        record: &DeletedRecord,
        synced_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let collection = CollectionPath::tenant(tenant, record.source.container_collection());
        let mut fields = Fields::new();
        fields.insert("external_id".into(), serde_json::json!(record.external_id));
        fields.insert("deleted".into(), serde_json::json!(true));
        fields.insert("synced_at".into(), serde_json::json!(synced_at));
        self.store
            .merge_by_natural_key(&collection, &record.external_id, fields)
            .await
    }
}

/// Container fields, leaving an existing contact link alone when unresolved
fn container_fields<T: serde::Serialize>(doc: &T) -> anyhow::Result<Fields> {
    let mut fields = to_fields(doc)?;
    if fields.get("contact_id").is_some_and(serde_json::Value::is_null) {
        fields.remove("contact_id");
    }
    Ok(fields)
}

fn record_write_error(external_id: &str, err: anyhow::Error) -> SyncError {
    SyncError::RecordWrite {
        external_id: external_id.to_string(),
        message: format!("{:#}", err),
    }
}
