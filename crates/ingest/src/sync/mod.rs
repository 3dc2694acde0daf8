//! Sync engine
//!
//! Runs jobs page by page with retries, and exposes the trigger/query
//! surface the rest of the application uses.

mod orchestrator;
mod retry;
mod service;

pub use orchestrator::SyncOrchestrator;
pub use retry::{RetryPolicy, with_retry};
pub use service::{DEFAULT_HISTORY_LIMIT, SyncService};
