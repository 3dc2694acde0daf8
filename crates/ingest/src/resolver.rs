//! Contact resolution
//!
//! Maps participant addresses to contacts keyed by their normalized address.
//! Lookups are reads by natural key; creation is a merge write on the same
//! key, so two resolvers racing on one address converge on one contact.

use chrono::{DateTime, Utc};
use log::debug;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};

use crate::error::SyncResult;
use crate::models::{
    Contact, ContactId, EmailAddress, Source, TenantId, normalize_address, split_display_name,
};
use crate::storage::{CollectionPath, Fields, SyncStore, decode};

/// Outcome of resolving one record's participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The contact already existed in the store
    Existing(ContactId),
    /// No contact existed; one will be created for this address
    Created(ContactId),
    /// The record has no usable participant address
    Unlinked,
}

impl Resolution {
    pub fn contact_id(&self) -> Option<&ContactId> {
        match self {
            Resolution::Existing(id) | Resolution::Created(id) => Some(id),
            Resolution::Unlinked => None,
        }
    }
}

/// Natural-key contact lookup and creation for one tenant
pub struct ContactResolver<'a> {
    store: &'a dyn SyncStore,
    tenant: &'a TenantId,
}

impl<'a> ContactResolver<'a> {
    pub fn new(store: &'a dyn SyncStore, tenant: &'a TenantId) -> Self {
        Self { store, tenant }
    }

    /// Read the contact stored under a normalized address
    pub async fn lookup(&self, normalized: &str) -> SyncResult<Option<Contact>> {
        let collection = CollectionPath::contacts(self.tenant);
        match self.store.get_by_natural_key(&collection, normalized).await? {
            Some(value) => Ok(Some(decode(&collection.doc(normalized), value)?)),
            None => Ok(None),
        }
    }

    /// Resolve an address to a contact id, creating the contact if needed
    ///
    /// Returns `None` when the address cannot be normalized.
    pub async fn resolve(&self, address: &EmailAddress, origin: Source) -> SyncResult<Option<ContactId>> {
        let Some(normalized) = address.normalized() else {
            return Ok(None);
        };
        if self.lookup(&normalized).await?.is_none() {
            let fields = new_contact_fields(&normalized, address.name.as_deref(), origin);
            self.store
                .merge_by_natural_key(&CollectionPath::contacts(self.tenant), &normalized, fields)
                .await?;
        }
        Ok(Some(ContactId::new(normalized)))
    }
}

/// Fields written when a contact is first seen
fn new_contact_fields(normalized: &str, display_name: Option<&str>, origin: Source) -> Fields {
    let mut fields = Fields::new();
    fields.insert("primary_address".into(), json!(normalized));
    fields.insert("origin".into(), json!(origin.as_str()));
    if let Some(name) = display_name.map(str::trim).filter(|n| !n.is_empty()) {
        let (first, last) = split_display_name(name);
        fields.insert("display_name".into(), json!(name));
        if let Some(first) = first {
            fields.insert("first_name".into(), json!(first));
        }
        if let Some(last) = last {
            fields.insert("last_name".into(), json!(last));
        }
    }
    fields
}

/// Per-contact work accumulated during one page
#[derive(Debug)]
struct PendingContact {
    created: bool,
    display_name: Option<String>,
    linked_items: BTreeMap<String, DateTime<Utc>>,
}

/// A contact write produced at the end of a page
#[derive(Debug, Clone, PartialEq)]
pub struct ContactUpsert {
    pub contact_id: ContactId,
    pub created: bool,
    pub fields: Fields,
}

/// Page-scoped resolver cache
///
/// Each distinct normalized address is looked up at most once per page.
/// Contact writes are deferred so every touched contact gets exactly one
/// merge per page, carrying creation fields (if new) and its linked items.
pub struct PageResolver<'a> {
    resolver: ContactResolver<'a>,
    source: Source,
    cache: HashMap<String, ContactId>,
    pending: BTreeMap<ContactId, PendingContact>,
}

impl<'a> PageResolver<'a> {
    pub fn new(store: &'a dyn SyncStore, tenant: &'a TenantId, source: Source) -> Self {
        Self {
            resolver: ContactResolver::new(store, tenant),
            source,
            cache: HashMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Resolve a record's participant
    pub async fn resolve(&mut self, participant: Option<&EmailAddress>) -> SyncResult<Resolution> {
        let Some(address) = participant else {
            return Ok(Resolution::Unlinked);
        };
        let Some(normalized) = normalize_address(&address.email) else {
            debug!("Unusable participant address {:?}", address.email);
            return Ok(Resolution::Unlinked);
        };

        if let Some(id) = self.cache.get(&normalized) {
            let created = self.pending.get(id).is_some_and(|p| p.created);
            return Ok(if created {
                Resolution::Created(id.clone())
            } else {
                Resolution::Existing(id.clone())
            });
        }

        let existing = self.resolver.lookup(&normalized).await?;
        let id = ContactId::new(normalized.clone());
        let created = existing.is_none();
        self.cache.insert(normalized, id.clone());
        self.pending.insert(
            id.clone(),
            PendingContact {
                created,
                display_name: address.name.clone(),
                linked_items: BTreeMap::new(),
            },
        );

        Ok(if created {
            Resolution::Created(id)
        } else {
            Resolution::Existing(id)
        })
    }

    /// Record an item that will be linked to `contact`
    pub fn link(&mut self, contact: &ContactId, item_key: String, at: DateTime<Utc>) {
        if let Some(pending) = self.pending.get_mut(contact) {
            let entry = pending.linked_items.entry(item_key).or_insert(at);
            if at > *entry {
                *entry = at;
            }
        }
    }

    /// Drain the page's contact writes, one per distinct contact
    ///
    /// Contacts with no linked item are skipped.
    pub fn into_upserts(self) -> Vec<ContactUpsert> {
        let source = self.source;
        self.pending
            .into_iter()
            .filter(|(_, pending)| !pending.linked_items.is_empty())
            .map(|(contact_id, pending)| {
                let mut fields = if pending.created {
                    new_contact_fields(contact_id.as_str(), pending.display_name.as_deref(), source)
                } else {
                    let mut fields = Fields::new();
                    fields.insert("primary_address".into(), json!(contact_id.as_str()));
                    fields
                };
                let linked: serde_json::Map<String, Value> = pending
                    .linked_items
                    .into_iter()
                    .map(|(key, at)| (key, json!(at)))
                    .collect();
                fields.insert("linked_items".into(), Value::Object(linked));

                ContactUpsert {
                    contact_id,
                    created: pending.created,
                    fields,
                }
            })
            .collect()
    }
}
