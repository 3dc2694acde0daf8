//! Domain models for ingested entities

mod contact;
mod credential;
mod event;
mod sync_job;
mod sync_state;
mod tenant;
mod thread;

pub use contact::{
    Contact, ContactId, EmailAddress, linked_item_key, normalize_address, split_display_name,
};
pub use credential::{AccessToken, Credential, TokenGrant};
pub use event::{Event, Occurrence};
pub use sync_job::{JobCounters, JobId, JobStatus, SyncJob, SyncMode};
pub use sync_state::{Cursor, SyncSettings};
pub use tenant::{Source, TenantId};
pub use thread::{Message, Thread};
