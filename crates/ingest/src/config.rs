//! Configuration for the ingestion pipeline
//!
//! `SyncConfig` is built once at startup and handed to the orchestrator; no
//! part of the pipeline reads process-wide settings on its own.
//!
//! OAuth client credentials are loaded from (in order of priority):
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file (Google Cloud Console format)
//! 3. Runtime environment variables (fallback)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Credentials filename in the Touchpoint config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Pipeline settings filename in the Touchpoint config directory
const SETTINGS_FILE: &str = "sync.json";

/// Largest page the provider accepts
pub const MAX_PAGE_SIZE: usize = 500;

/// OAuth client credentials for the provider
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct CredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl ProviderCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials
    /// 2. JSON file (~/.config/touchpoint/google-credentials.json)
    /// 3. Runtime environment variables
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            let creds: CredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Load credentials embedded at compile time via environment variables.
    /// Build with: TOUCHPOINT_CLIENT_ID=xxx TOUCHPOINT_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("TOUCHPOINT_CLIENT_ID")?;
        let client_secret = option_env!("TOUCHPOINT_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: CredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: CredentialFile) -> Result<Self> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: CredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("TOUCHPOINT_CLIENT_ID")
            .context("TOUCHPOINT_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("TOUCHPOINT_CLIENT_SECRET")
            .context("TOUCHPOINT_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// Get the default credentials file path
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

/// Everything the pipeline needs to know about its environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// OAuth client id (filled from [`ProviderCredentials`] when empty)
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    /// Redirect target registered for the OAuth client
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    /// Base URL of the provider's change/range endpoints
    pub api_base_url: String,
    /// Records requested per page
    pub page_size: usize,
    /// Attempts per operation before a retryable error becomes fatal
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Cached access tokens expiring within this margin are refreshed
    pub token_expiry_margin_secs: u64,
    /// Timeout applied to every provider and token-endpoint call
    pub request_timeout_secs: u64,
    /// Default calendar window, relative to now
    pub calendar_past_days: i64,
    pub calendar_future_days: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "http://localhost:8080/oauth/callback".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            scopes: vec![
                "https://www.googleapis.com/auth/gmail.readonly".to_string(),
                "https://www.googleapis.com/auth/calendar.readonly".to_string(),
            ],
            api_base_url: "https://sync.touchpoint.app/v1".to_string(),
            page_size: 100,
            max_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 60_000,
            token_expiry_margin_secs: 60,
            request_timeout_secs: 30,
            calendar_past_days: 30,
            calendar_future_days: 90,
        }
    }
}

impl SyncConfig {
    /// Load settings from `sync.json` (if present) and fill in credentials
    pub fn load() -> Result<Self> {
        let mut cfg: Self = config::load_json_or_default(SETTINGS_FILE)?;
        cfg.apply_env_overrides();
        if cfg.client_id.is_empty() || cfg.client_secret.is_empty() {
            let creds = ProviderCredentials::load()?;
            cfg.client_id = creds.client_id;
            cfg.client_secret = creds.client_secret;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `TOUCHPOINT_*` environment overrides for the tunable knobs
    pub fn apply_env_overrides(&mut self) {
        fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok()?.trim().parse().ok()
        }

        if let Some(v) = parsed("TOUCHPOINT_PAGE_SIZE") {
            self.page_size = v;
        }
        if let Some(v) = parsed("TOUCHPOINT_MAX_ATTEMPTS") {
            self.max_attempts = v;
        }
        if let Some(v) = parsed("TOUCHPOINT_BACKOFF_BASE_MS") {
            self.backoff_base_ms = v;
        }
        if let Ok(v) = std::env::var("TOUCHPOINT_API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Ok(v) = std::env::var("TOUCHPOINT_REDIRECT_URI") {
            self.redirect_uri = v;
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_attempts >= 1, "max_attempts must be at least 1");
        anyhow::ensure!(self.page_size >= 1, "page_size must be at least 1");
        anyhow::ensure!(
            self.backoff_base_ms <= self.backoff_max_ms,
            "backoff_base_ms must not exceed backoff_max_ms"
        );
        url::Url::parse(&self.api_base_url).context("api_base_url is not a valid URL")?;
        url::Url::parse(&self.token_url).context("token_url is not a valid URL")?;
        Ok(())
    }

    /// Page size clamped to what the provider accepts
    pub fn page_size(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn token_expiry_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_expiry_margin_secs as i64)
    }

    /// Default calendar window around `now`
    pub fn calendar_window(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> (chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>) {
        (
            now - chrono::Duration::days(self.calendar_past_days),
            now + chrono::Duration::days(self.calendar_future_days),
        )
    }
}
