//! Integration tests for the ingest crate
//!
//! These tests drive whole jobs through the orchestrator with scripted
//! providers and token endpoints.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use ingest::models::{AccessToken, Credential, Cursor, EmailAddress, JobCounters, TokenGrant};
use ingest::provider::{ChangePage, MessageRecord, ProviderRecord, RangePage, ThreadRecord};
use ingest::provider::{EventRecord, OccurrenceRecord};
use ingest::storage::{CollectionPath, InMemorySyncStore, SqliteSyncStore, SyncStore, to_fields};
use ingest::{
    JobId, JobStatus, JobTracker, Provider, Source, SyncConfig, SyncError, SyncMode, SyncOrchestrator, SyncResult,
    SyncService, TenantId, TokenEndpoint,
};

// === Fakes ===

/// Provider that replays scripted responses and records what it was asked
#[derive(Default)]
struct ScriptedProvider {
    changes: Mutex<VecDeque<SyncResult<ChangePage>>>,
    ranges: Mutex<VecDeque<SyncResult<RangePage>>>,
    cursors_seen: Mutex<Vec<Option<String>>>,
    tokens_seen: Mutex<Vec<String>>,
    /// Number of upcoming change fetches that never answer
    hangs: AtomicUsize,
    /// Job to cancel while the next change fetch is in flight
    cancel_on_fetch: Mutex<Option<(JobTracker, TenantId, JobId)>>,
}

impl ScriptedProvider {
    fn with_changes(responses: Vec<SyncResult<ChangePage>>) -> Arc<Self> {
        let provider = Self::default();
        *provider.changes.lock().unwrap() = responses.into();
        Arc::new(provider)
    }

    fn with_ranges(responses: Vec<SyncResult<RangePage>>) -> Arc<Self> {
        let provider = Self::default();
        *provider.ranges.lock().unwrap() = responses.into();
        Arc::new(provider)
    }

    fn calls(&self) -> usize {
        self.tokens_seen.lock().unwrap().len()
    }

    fn cursors_seen(&self) -> Vec<Option<String>> {
        self.cursors_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn list_changes(
        &self,
        token: &AccessToken,
        _source: Source,
        cursor: Option<&Cursor>,
        _page_size: usize,
    ) -> SyncResult<ChangePage> {
        self.tokens_seen.lock().unwrap().push(token.as_str().to_string());
        self.cursors_seen
            .lock()
            .unwrap()
            .push(cursor.map(|c| c.as_str().to_string()));

        let cancel = self.cancel_on_fetch.lock().unwrap().take();
        if let Some((jobs, tenant, id)) = cancel {
            jobs.request_cancel(&tenant, &id).await.unwrap();
        }
        let hang = self
            .hangs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hang {
            std::future::pending::<()>().await;
        }

        self.changes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ChangePage::default()))
    }

    async fn list_in_range(
        &self,
        token: &AccessToken,
        _source: Source,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> SyncResult<RangePage> {
        self.tokens_seen.lock().unwrap().push(token.as_str().to_string());
        self.ranges
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RangePage::default()))
    }
}

/// Provider whose every call panics
struct PanickingProvider;

#[async_trait]
impl Provider for PanickingProvider {
    async fn list_changes(
        &self,
        _token: &AccessToken,
        _source: Source,
        _cursor: Option<&Cursor>,
        _page_size: usize,
    ) -> SyncResult<ChangePage> {
        panic!("provider blew up");
    }

    async fn list_in_range(
        &self,
        _token: &AccessToken,
        _source: Source,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> SyncResult<RangePage> {
        panic!("provider blew up");
    }
}

/// Token endpoint with a scripted sequence of outcomes
#[derive(Default)]
struct ScriptedEndpoint {
    responses: Mutex<VecDeque<SyncResult<TokenGrant>>>,
    calls: AtomicUsize,
}

impl ScriptedEndpoint {
    fn new(responses: Vec<SyncResult<TokenGrant>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TokenEndpoint for ScriptedEndpoint {
    async fn refresh(&self, _refresh_token: &str) -> SyncResult<TokenGrant> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(TokenGrant {
                access_token: AccessToken::new(format!("refreshed-{}", n)),
                expires_in: 3600,
                refresh_token: None,
                scope: None,
            })
        })
    }
}

// === Helpers ===

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn thread(id: &str, from: &str) -> ProviderRecord {
    let from = EmailAddress::new(from);
    ProviderRecord::ThreadChanged(ThreadRecord {
        external_id: id.to_string(),
        subject: format!("About {}", id),
        snippet: "snippet".into(),
        participant: Some(from.clone()),
        messages: vec![MessageRecord {
            external_id: format!("{}-m1", id),
            sent_at: ts(id.len() as i64),
            from: Some(from),
            to: vec![],
            snippet: "snippet".into(),
            labels: vec!["INBOX".into()],
        }],
    })
}

fn page(records: Vec<ProviderRecord>, next: Option<&str>, has_more: bool) -> ChangePage {
    ChangePage {
        records,
        rejected: vec![],
        next_cursor: next.map(Cursor::new),
        has_more,
    }
}

fn test_config() -> SyncConfig {
    SyncConfig {
        max_attempts: 3,
        backoff_base_ms: 10,
        backoff_max_ms: 100,
        ..SyncConfig::default()
    }
}

async fn seed_credential(store: &dyn SyncStore, tenant: &TenantId, valid_for_secs: i64) {
    let credential = Credential {
        refresh_token: "refresh-secret".into(),
        access_token: Some("cached-token".into()),
        access_token_expires_at: Some(Utc::now() + ChronoDuration::seconds(valid_for_secs)),
        scope: Some("mail calendar".into()),
        granted_at: Some(Utc::now()),
    };
    store
        .merge_credential(tenant, to_fields(&credential).unwrap())
        .await
        .unwrap();
}

fn orchestrator(
    store: Arc<dyn SyncStore>,
    provider: Arc<ScriptedProvider>,
    endpoint: Arc<ScriptedEndpoint>,
) -> SyncOrchestrator {
    SyncOrchestrator::new(test_config(), store, provider, endpoint)
}

// === Scenarios ===

#[tokio::test]
async fn test_two_addresses_three_threads() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;

    let provider = ScriptedProvider::with_changes(vec![Ok(page(
        vec![
            thread("t1", "a@example.com"),
            thread("t2", "a@example.com"),
            thread("t3", "b@example.com"),
        ],
        Some("c1"),
        false,
    ))]);
    let orch = orchestrator(store.clone(), provider, ScriptedEndpoint::new(vec![]));

    let job = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.counters.processed, 3);
    assert_eq!(job.counters.errors, 0);
    assert_eq!(job.counters.contacts_upserted, 2);
    assert_eq!(job.counters.items_upserted, 3);
    assert_eq!(store.writes_to(&CollectionPath::contacts(&tenant)), 2);
    assert_eq!(
        store.writes_to(&CollectionPath::tenant(&tenant, "threads")),
        3
    );
    assert_eq!(
        store.get_cursor(&tenant, Source::Mail).await.unwrap(),
        Some(Cursor::new("c1"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_then_success() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;

    let provider = ScriptedProvider::with_changes(vec![
        Err(SyncError::RateLimited {
            retry_after: Duration::from_secs(5),
        }),
        Ok(page(vec![thread("t1", "a@example.com")], Some("c1"), false)),
    ]);
    let orch = orchestrator(store.clone(), provider.clone(), ScriptedEndpoint::new(vec![]));

    let job = orch
        .jobs()
        .create(&tenant, Source::Mail, SyncMode::Incremental)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let start = tokio::time::Instant::now();
    let done = orch.run(&job).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(5));
    assert_eq!(done.status, JobStatus::Complete);
    assert!(done.started_at.is_some());
    assert!(done.error_message.is_none());
    assert!(done.last_error.is_none());
    assert_eq!(done.counters.pages, 1);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_invalid_grant_fails_job() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    // Cached token already expired, so the first fetch needs a refresh
    seed_credential(store.as_ref(), &tenant, -10).await;

    let provider = ScriptedProvider::with_changes(vec![]);
    let endpoint = ScriptedEndpoint::new(vec![Err(SyncError::AuthRevoked(
        "invalid_grant: Token has been expired or revoked.".into(),
    ))]);
    let orch = orchestrator(store.clone(), provider.clone(), endpoint.clone());

    let job = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error_message.unwrap().contains("auth revoked"));
    assert_eq!(job.counters.pages, 0);
    assert_eq!(provider.calls(), 0);
    // Not retried
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);

    let credential = store.get_credential(&tenant).await.unwrap().unwrap();
    assert_eq!(credential.refresh_token, "refresh-secret");
}

#[tokio::test]
async fn test_missing_credential_fails_job() {
    let store = Arc::new(InMemorySyncStore::new());
    let orch = orchestrator(
        store,
        ScriptedProvider::with_changes(vec![]),
        ScriptedEndpoint::new(vec![]),
    );
    let job = orch
        .sync(&TenantId::new("ghost"), Source::Calendar, SyncMode::Incremental)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error_message.unwrap().contains("auth revoked"));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_exhaust_retries() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;

    let provider = ScriptedProvider::with_changes(vec![
        Err(SyncError::Timeout(Duration::from_secs(30))),
        Err(SyncError::Network("connection reset".into())),
        Err(SyncError::Provider {
            status: 503,
            message: "unavailable".into(),
        }),
        Ok(page(vec![thread("t1", "a@example.com")], None, false)),
    ]);
    let orch = orchestrator(store.clone(), provider.clone(), ScriptedEndpoint::new(vec![]));

    let job = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error_message.unwrap().contains("gave up after 3 attempts"));
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn test_rejected_token_is_refreshed() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;

    let provider = ScriptedProvider::with_changes(vec![
        Err(SyncError::TransientAuth("provider rejected access token".into())),
        Ok(page(vec![thread("t1", "a@example.com")], Some("c1"), false)),
    ]);
    let endpoint = ScriptedEndpoint::new(vec![]);
    let orch = orchestrator(store.clone(), provider.clone(), endpoint.clone());

    let job = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    let tokens = provider.tokens_seen.lock().unwrap().clone();
    assert_eq!(tokens, vec!["cached-token".to_string(), "refreshed-0".to_string()]);
}

#[tokio::test]
async fn test_pages_advance_cursor_in_order() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;
    store
        .set_cursor(&tenant, Source::Mail, &Cursor::new("c0"))
        .await
        .unwrap();

    let provider = ScriptedProvider::with_changes(vec![
        Ok(page(vec![thread("t1", "a@example.com")], Some("c1"), true)),
        Ok(page(vec![thread("t2", "b@example.com")], Some("c2"), true)),
        Ok(page(vec![], Some("c3"), false)),
    ]);
    let orch = orchestrator(store.clone(), provider.clone(), ScriptedEndpoint::new(vec![]));

    let job = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.counters.pages, 3);
    assert_eq!(job.counters.processed, 2);
    assert_eq!(
        provider.cursors_seen(),
        vec![Some("c0".into()), Some("c1".into()), Some("c2".into())]
    );
    assert_eq!(
        orch.cursor(&tenant, Source::Mail).await.unwrap(),
        Some(Cursor::new("c3"))
    );
}

#[tokio::test]
async fn test_crash_before_cursor_advance_replays_cleanly() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;
    let records = || {
        vec![
            thread("t1", "a@example.com"),
            thread("t2", "b@example.com"),
            thread("t3", "a@example.com"),
        ]
    };

    // Page writes land but persisting the cursor fails
    store.fail_writes_containing("settings/sync");
    let provider = ScriptedProvider::with_changes(vec![Ok(page(records(), Some("c1"), false))]);
    let orch = orchestrator(store.clone(), provider, ScriptedEndpoint::new(vec![]));
    let crashed = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();
    assert_eq!(crashed.status, JobStatus::Error);
    assert_eq!(crashed.counters.processed, 3);
    assert!(store.get_cursor(&tenant, Source::Mail).await.unwrap().is_none());

    let contacts = CollectionPath::contacts(&tenant);
    let threads = CollectionPath::tenant(&tenant, "threads");
    let contacts_before = store.document_count(&contacts);
    let threads_before = store.document_count(&threads);

    // Restart from the old cursor and re-apply the same page
    store.clear_write_failures();
    let provider = ScriptedProvider::with_changes(vec![Ok(page(records(), Some("c1"), false))]);
    let orch = orchestrator(store.clone(), provider.clone(), ScriptedEndpoint::new(vec![]));
    let replayed = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();

    assert_eq!(replayed.status, JobStatus::Complete);
    assert_eq!(provider.cursors_seen(), vec![None]);
    assert_eq!(replayed.counters.contacts_created, 0);
    assert_eq!(store.document_count(&contacts), contacts_before);
    assert_eq!(store.document_count(&threads), threads_before);
    assert_eq!(store.document_count(&contacts), 2);

    let snapshot = store.snapshot();
    let a = &snapshot["tenant/acme/contacts/a%40example.com"];
    assert_eq!(a["linked_items"].as_object().unwrap().len(), 2);
}

#[tokio::test]
async fn test_natural_key_uniqueness_across_pages_and_jobs() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;

    let provider = ScriptedProvider::with_changes(vec![
        Ok(page(
            vec![thread("t1", "a@example.com"), thread("t2", "b@example.com")],
            Some("c1"),
            true,
        )),
        Ok(page(
            vec![thread("t3", "A@Example.COM"), thread("t4", "c@example.com")],
            Some("c2"),
            false,
        )),
    ]);
    let orch = orchestrator(store.clone(), provider, ScriptedEndpoint::new(vec![]));
    let first = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();
    assert_eq!(first.counters.contacts_created, 3);

    // A calendar job touching the same people creates nobody new
    let event = ProviderRecord::EventChanged(EventRecord {
        external_id: "e1".into(),
        title: "Planning".into(),
        status: None,
        participant: Some(EmailAddress::new("mailto:B@example.com")),
        occurrences: vec![OccurrenceRecord {
            external_id: "e1".into(),
            starts_at: ts(100),
            ends_at: None,
            status: None,
        }],
    });
    let provider = ScriptedProvider::with_changes(vec![Ok(page(vec![event], Some("k1"), false))]);
    let orch = orchestrator(store.clone(), provider, ScriptedEndpoint::new(vec![]));
    let second = orch.sync(&tenant, Source::Calendar, SyncMode::Incremental).await.unwrap();
    assert_eq!(second.counters.contacts_created, 0);
    assert_eq!(second.counters.contacts_upserted, 1);

    assert_eq!(store.document_count(&CollectionPath::contacts(&tenant)), 3);
    let b = &store.snapshot()["tenant/acme/contacts/b%40example.com"];
    assert_eq!(b["linked_items"].as_object().unwrap().len(), 2);
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let store = Arc::new(InMemorySyncStore::new());
    let acme = TenantId::new("acme");
    let globex = TenantId::new("globex");
    seed_credential(store.as_ref(), &acme, 3600).await;
    seed_credential(store.as_ref(), &globex, 3600).await;

    for tenant in [&acme, &globex] {
        let provider = ScriptedProvider::with_changes(vec![Ok(page(
            vec![thread("t1", "shared@example.com")],
            Some("c1"),
            false,
        ))]);
        let orch = orchestrator(store.clone(), provider, ScriptedEndpoint::new(vec![]));
        let job = orch.sync(tenant, Source::Mail, SyncMode::Incremental).await.unwrap();
        assert_eq!(job.counters.contacts_created, 1);
    }

    assert_eq!(store.document_count(&CollectionPath::contacts(&acme)), 1);
    assert_eq!(store.document_count(&CollectionPath::contacts(&globex)), 1);
}

#[tokio::test]
async fn test_terminal_job_is_frozen() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;
    let provider = ScriptedProvider::with_changes(vec![Ok(page(
        vec![thread("t1", "a@example.com")],
        None,
        false,
    ))]);
    let orch = orchestrator(store.clone(), provider, ScriptedEndpoint::new(vec![]));
    let job = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();
    assert_eq!(job.status, JobStatus::Complete);

    let bogus = JobCounters {
        processed: 1_000,
        ..JobCounters::default()
    };
    let err = orch
        .jobs()
        .record_page(&tenant, &job.id, &bogus, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::JobTerminal(_, JobStatus::Complete)));
    assert_err!(orch.jobs().fail(&tenant, &job.id, "late failure").await);
    assert_err!(orch.run(&job).await);

    let stored = orch.jobs().get(&tenant, &job.id).await.unwrap();
    assert_eq!(stored, job);
}

#[tokio::test]
async fn test_cursor_expired_is_fatal() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;
    store
        .set_cursor(&tenant, Source::Mail, &Cursor::new("ancient"))
        .await
        .unwrap();

    let provider = ScriptedProvider::with_changes(vec![Err(SyncError::CursorExpired)]);
    let orch = orchestrator(store.clone(), provider, ScriptedEndpoint::new(vec![]));
    let job = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error_message.unwrap().contains("full resync"));

    // A full resync starts over from the beginning of the feed
    let provider = ScriptedProvider::with_changes(vec![Ok(page(
        vec![thread("t1", "a@example.com")],
        Some("fresh"),
        false,
    ))]);
    let orch = orchestrator(store.clone(), provider.clone(), ScriptedEndpoint::new(vec![]));
    let job = orch.sync(&tenant, Source::Mail, SyncMode::FullResync).await.unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(provider.cursors_seen(), vec![None]);
    assert_eq!(
        store.get_cursor(&tenant, Source::Mail).await.unwrap(),
        Some(Cursor::new("fresh"))
    );
}

#[tokio::test]
async fn test_cancel_before_first_page() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;
    let provider = ScriptedProvider::with_changes(vec![]);
    let orch = orchestrator(store.clone(), provider.clone(), ScriptedEndpoint::new(vec![]));

    let job = orch
        .jobs()
        .create(&tenant, Source::Mail, SyncMode::Incremental)
        .await
        .unwrap();
    assert_ok!(orch.jobs().request_cancel(&tenant, &job.id).await);

    let done = orch.run(&job).await.unwrap();
    assert_eq!(done.status, JobStatus::Error);
    assert!(done.error_message.unwrap().contains("cancelled"));
    assert_eq!(done.counters.pages, 0);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_window_leaves_cursor_alone() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;
    store
        .set_cursor(&tenant, Source::Calendar, &Cursor::new("k9"))
        .await
        .unwrap();

    let event = ProviderRecord::EventChanged(EventRecord {
        external_id: "e1".into(),
        title: "Offsite".into(),
        status: Some("confirmed".into()),
        participant: Some(EmailAddress::with_name("Dana Scully", "dana@example.com")),
        occurrences: vec![OccurrenceRecord {
            external_id: "e1".into(),
            starts_at: ts(3_600),
            ends_at: Some(ts(7_200)),
            status: None,
        }],
    });
    let provider = ScriptedProvider::with_ranges(vec![Ok(RangePage {
        records: vec![event],
        rejected: vec![],
    })]);
    let orch = orchestrator(store.clone(), provider, ScriptedEndpoint::new(vec![]));

    let mode = SyncMode::Window {
        start: ts(0),
        end: ts(86_400),
    };
    let job = orch.sync(&tenant, Source::Calendar, mode).await.unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.counters.items_upserted, 1);
    assert_eq!(
        store.get_cursor(&tenant, Source::Calendar).await.unwrap(),
        Some(Cursor::new("k9"))
    );

    let snapshot = store.snapshot();
    assert_eq!(snapshot["tenant/acme/events/e1"]["contact_id"], "dana@example.com");
}

#[tokio::test]
async fn test_sqlite_end_to_end() {
    let temp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(SqliteSyncStore::new(temp.path().join("touchpoint.db")).unwrap());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, -10).await;

    let provider = ScriptedProvider::with_changes(vec![
        Ok(page(
            vec![thread("t1", "a@example.com"), thread("t2", "b@example.com")],
            Some("c1"),
            true,
        )),
        Ok(page(vec![thread("t1", "a@example.com")], Some("c2"), false)),
    ]);
    let orch = orchestrator(store.clone(), provider, ScriptedEndpoint::new(vec![]));
    let job = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();

    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.counters.processed, 3);
    assert_eq!(job.counters.contacts_created, 2);
    assert_eq!(
        store.get_cursor(&tenant, Source::Mail).await.unwrap(),
        Some(Cursor::new("c2"))
    );
    let credential = store.get_credential(&tenant).await.unwrap().unwrap();
    assert_eq!(credential.access_token.as_deref(), Some("refreshed-0"));
    assert_eq!(credential.refresh_token, "refresh-secret");

    let contacts = store
        .list_documents(&CollectionPath::contacts(&tenant))
        .await
        .unwrap();
    assert_eq!(contacts.len(), 2);
    let history = store.list_sync_jobs(&tenant).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, job.id);
}

#[tokio::test]
async fn test_service_trigger_returns_immediately() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;
    let provider = ScriptedProvider::with_changes(vec![Ok(page(
        vec![thread("t1", "a@example.com")],
        Some("c1"),
        false,
    ))]);
    let service = SyncService::new(Arc::new(orchestrator(
        store.clone(),
        provider,
        ScriptedEndpoint::new(vec![]),
    )));

    let id = service.trigger_sync(&tenant, Source::Mail).await.unwrap();
    let done = service
        .wait_for(&tenant, &id, Duration::from_millis(5))
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Complete);

    let last = service.last_job(&tenant, Some(Source::Mail)).await.unwrap().unwrap();
    assert_eq!(last.id, id);
    assert_eq!(service.job_history(&tenant, 10).await.unwrap().len(), 1);
    assert!(service.last_job(&tenant, Some(Source::Calendar)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_more_pages_without_cursor_is_fatal() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;
    store
        .set_cursor(&tenant, Source::Mail, &Cursor::new("c0"))
        .await
        .unwrap();

    let provider = ScriptedProvider::with_changes(vec![
        Ok(page(vec![thread("t1", "a@example.com")], None, true)),
        Ok(page(vec![], Some("never"), false)),
    ]);
    let orch = orchestrator(store.clone(), provider.clone(), ScriptedEndpoint::new(vec![]));
    let job = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();

    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error_message.unwrap().contains("no next cursor"));
    assert_eq!(provider.calls(), 1);
    assert_eq!(job.counters.pages, 0);
    assert_eq!(
        store.get_cursor(&tenant, Source::Mail).await.unwrap(),
        Some(Cursor::new("c0"))
    );
}

#[tokio::test]
async fn test_stuck_cursor_is_fatal() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;

    let provider = ScriptedProvider::with_changes(vec![
        Ok(page(vec![thread("t1", "a@example.com")], Some("c1"), true)),
        Ok(page(vec![thread("t2", "b@example.com")], Some("c1"), true)),
        Ok(page(vec![], Some("c2"), false)),
    ]);
    let orch = orchestrator(store.clone(), provider.clone(), ScriptedEndpoint::new(vec![]));
    let job = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();

    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error_message.unwrap().contains("did not advance"));
    assert_eq!(provider.calls(), 2);
    assert_eq!(job.counters.pages, 1);
    assert_eq!(
        store.get_cursor(&tenant, Source::Mail).await.unwrap(),
        Some(Cursor::new("c1"))
    );
    // The repeated page was not applied
    assert!(!store.snapshot().contains_key("tenant/acme/threads/t2"));
}

#[tokio::test(start_paused = true)]
async fn test_hung_request_times_out_and_retries() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;

    let provider = ScriptedProvider::with_changes(vec![Ok(page(
        vec![thread("t1", "a@example.com")],
        Some("c1"),
        false,
    ))]);
    provider.hangs.store(1, Ordering::SeqCst);
    let config = SyncConfig {
        request_timeout_secs: 2,
        ..test_config()
    };
    let orch = SyncOrchestrator::new(
        config,
        store.clone(),
        provider.clone(),
        ScriptedEndpoint::new(vec![]),
    );

    let start = tokio::time::Instant::now();
    let job = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(provider.calls(), 2);
    assert_eq!(job.counters.items_upserted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_request_that_never_answers_fails_job() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;

    let provider = ScriptedProvider::with_changes(vec![]);
    provider.hangs.store(usize::MAX, Ordering::SeqCst);
    let config = SyncConfig {
        request_timeout_secs: 2,
        ..test_config()
    };
    let orch = SyncOrchestrator::new(
        config,
        store.clone(),
        provider.clone(),
        ScriptedEndpoint::new(vec![]),
    );

    let job = orch.sync(&tenant, Source::Mail, SyncMode::Incremental).await.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    let message = job.error_message.unwrap();
    assert!(message.contains("gave up after 3 attempts"));
    assert!(message.contains("timed out"));
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn test_cancel_between_pages() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;

    let provider = ScriptedProvider::with_changes(vec![
        Ok(page(vec![thread("t1", "a@example.com")], Some("c1"), true)),
        Ok(page(vec![thread("t2", "b@example.com")], Some("c2"), false)),
    ]);
    let orch = orchestrator(store.clone(), provider.clone(), ScriptedEndpoint::new(vec![]));
    let job = orch
        .jobs()
        .create(&tenant, Source::Mail, SyncMode::Incremental)
        .await
        .unwrap();
    *provider.cancel_on_fetch.lock().unwrap() =
        Some((orch.jobs().clone(), tenant.clone(), job.id.clone()));

    let done = orch.run(&job).await.unwrap();

    // Page 1 lands in full; page 2 is never requested
    assert_eq!(done.status, JobStatus::Error);
    assert!(done.error_message.unwrap().contains("cancelled"));
    assert_eq!(done.counters.pages, 1);
    assert_eq!(done.counters.items_upserted, 1);
    assert_eq!(provider.calls(), 1);
    assert_eq!(
        store.get_cursor(&tenant, Source::Mail).await.unwrap(),
        Some(Cursor::new("c1"))
    );
}

#[tokio::test]
async fn test_panicking_run_still_ends_job() {
    let store = Arc::new(InMemorySyncStore::new());
    let tenant = TenantId::new("acme");
    seed_credential(store.as_ref(), &tenant, 3600).await;
    let service = SyncService::new(Arc::new(SyncOrchestrator::new(
        test_config(),
        store,
        Arc::new(PanickingProvider),
        ScriptedEndpoint::new(vec![]),
    )));

    let id = service.trigger_sync(&tenant, Source::Mail).await.unwrap();
    let done = service
        .wait_for(&tenant, &id, Duration::from_millis(5))
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Error);
    assert!(done.error_message.unwrap().contains("aborted"));
}
