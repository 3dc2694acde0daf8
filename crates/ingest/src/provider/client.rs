//! Provider HTTP client
//!
//! Fetches change pages and time-ranged listings. HTTP is synchronous (ureq)
//! and runs on the blocking pool so the orchestrator stays executor-agnostic
//! about the transport.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use std::time::Duration;
use ureq::Agent;
use url::Url;

use super::api::{ChangesResponse, RangeResponse};
use super::normalize::{normalize_items, parse_retry_after};
use super::{ChangePage, Provider, RangePage};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{AccessToken, Cursor, Source};

/// Fallback pause when the provider throttles without a `Retry-After`
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Which listing a request belongs to
///
/// Only the change feed carries a cursor, so only it can report one as gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Listing {
    Changes,
    Range,
}

/// HTTP implementation of [`Provider`]
#[derive(Clone)]
pub struct HttpProvider {
    agent: Agent,
    base_url: Url,
    timeout: Duration,
}

impl HttpProvider {
    /// Create a client for the configured API base URL
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|e| SyncError::ProviderProtocol(format!("invalid api_base_url: {}", e)))?;
        let timeout = config.request_timeout();
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Ok(Self {
            agent,
            base_url,
            timeout,
        })
    }

    /// `{base}/{source}/{endpoint}`
    fn endpoint(&self, source: Source, endpoint: &str) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::ProviderProtocol("api_base_url cannot be a base".into()))?
            .pop_if_empty()
            .push(source.as_str())
            .push(endpoint);
        Ok(url)
    }

    /// GET a URL on the blocking pool and return the body on 2xx
    async fn get(&self, url: Url, token: &AccessToken, listing: Listing) -> SyncResult<String> {
        let agent = self.agent.clone();
        let bearer = format!("Bearer {}", token.as_str());
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || fetch(&agent, &url, &bearer, timeout, listing))
            .await
            .map_err(|e| SyncError::Network(format!("provider request task failed: {}", e)))?
    }
}

fn fetch(
    agent: &Agent,
    url: &Url,
    bearer: &str,
    timeout: Duration,
    listing: Listing,
) -> SyncResult<String> {
    debug!("GET {}", url.path());

    let mut response = agent
        .get(url.as_str())
        .header("Authorization", bearer)
        .header("Accept", "application/json")
        .call()
        .map_err(|e| transport_error(e, timeout))?;

    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()));
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| transport_error(e, timeout))?;

    match classify_status(listing, status, retry_after, &body) {
        None => Ok(body),
        Some(err) => {
            warn!("Provider returned {} for {}: {}", status, url.path(), err);
            Err(err)
        }
    }
}

/// Map a non-success HTTP status onto the error taxonomy
///
/// Returns `None` for 2xx.
pub(crate) fn classify_status(
    listing: Listing,
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
) -> Option<SyncError> {
    let message = || truncate(body, 200);
    match status {
        200..=299 => None,
        429 => Some(SyncError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
        }),
        403 if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") => {
            Some(SyncError::RateLimited {
                retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
            })
        }
        401 => Some(SyncError::TransientAuth(format!(
            "provider rejected access token: {}",
            message()
        ))),
        404 | 410 if listing == Listing::Changes => Some(SyncError::CursorExpired),
        _ => Some(SyncError::Provider {
            status,
            message: message(),
        }),
    }
}

fn transport_error(err: ureq::Error, timeout: Duration) -> SyncError {
    match err {
        ureq::Error::Timeout(_) => SyncError::Timeout(timeout),
        other => SyncError::Network(other.to_string()),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}...", head)
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> SyncResult<T> {
    serde_json::from_str(body)
        .map_err(|e| SyncError::ProviderProtocol(format!("malformed response envelope: {}", e)))
}

#[async_trait]
impl Provider for HttpProvider {
    async fn list_changes(
        &self,
        token: &AccessToken,
        source: Source,
        cursor: Option<&Cursor>,
        page_size: usize,
    ) -> SyncResult<ChangePage> {
        let mut url = self.endpoint(source, "changes")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("pageSize", &page_size.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor.as_str());
            }
        }

        let body = self.get(url, token, Listing::Changes).await?;
        let response: ChangesResponse = parse_body(&body)?;

        // A page that claims more data must say where to continue from
        if response.has_more && response.next_page_cursor.is_none() {
            return Err(SyncError::ProviderProtocol(
                "hasMore without nextPageCursor".into(),
            ));
        }

        let (records, rejected) = normalize_items(response.items, source);
        debug!(
            "Fetched {} {} records ({} rejected, has_more={})",
            records.len(),
            source,
            rejected.len(),
            response.has_more
        );

        Ok(ChangePage {
            records,
            rejected,
            next_cursor: response.next_page_cursor.map(Cursor::new),
            has_more: response.has_more,
        })
    }

    async fn list_in_range(
        &self,
        token: &AccessToken,
        source: Source,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> SyncResult<RangePage> {
        let mut url = self.endpoint(source, "items")?;
        url.query_pairs_mut()
            .append_pair("timeMin", &start.to_rfc3339_opts(SecondsFormat::Secs, true))
            .append_pair("timeMax", &end.to_rfc3339_opts(SecondsFormat::Secs, true));

        let body = self.get(url, token, Listing::Range).await?;
        let response: RangeResponse = parse_body(&body)?;
        let (records, rejected) = normalize_items(response.items, source);

        Ok(RangePage { records, rejected })
    }
}
