//! Per-tenant OAuth credential

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bearer token for the external provider
///
/// Debug output is redacted so tokens never reach the logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken(pub String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Stored credential for one tenant (`tenant/{id}/private/credential`)
///
/// The refresh token is only replaced by an explicit re-authorization;
/// the access token and its expiry are a cache.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub refresh_token: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub access_token_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub granted_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Cached access token, if it remains valid for at least `margin`
    pub fn usable_access_token(&self, now: DateTime<Utc>, margin: Duration) -> Option<AccessToken> {
        let token = self.access_token.as_ref().filter(|t| !t.is_empty())?;
        let expires_at = self.access_token_expires_at?;
        if expires_at > now + margin {
            Some(AccessToken::new(token.clone()))
        } else {
            None
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("refresh_token", &"***")
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("scope", &self.scope)
            .field("granted_at", &self.granted_at)
            .finish()
    }
}

/// Result of a token-endpoint call
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: AccessToken,
    /// Lifetime reported by the provider, in seconds
    pub expires_in: u64,
    /// Present on authorization-code grants (and occasionally on refresh)
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &self.access_token)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("scope", &self.scope)
            .finish()
    }
}
