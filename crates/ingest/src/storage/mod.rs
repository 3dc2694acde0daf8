//! Storage traits and implementations
//!
//! This module defines the hierarchical per-tenant document store the
//! pipeline writes through. The trait-based design allows swapping between
//! the in-memory store used by tests and the SQLite store used in production.

mod memory;
mod merge;
mod path;
mod sqlite;
mod traits;

pub use memory::InMemorySyncStore;
pub use merge::{Fields, merge_patch, to_fields};
pub use path::{CollectionPath, DocPath, decode_key, encode_key};
pub use sqlite::SqliteSyncStore;
pub use traits::{SyncStore, decode};
pub(crate) use traits::into_fields;
