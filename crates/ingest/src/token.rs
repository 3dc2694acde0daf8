//! Access-token management
//!
//! Hands out bearer tokens for a tenant, refreshing the cached access token
//! from the stored refresh token when it is missing or about to expire.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde_json::json;
use std::sync::Arc;

use crate::error::{SyncError, SyncResult};
use crate::models::{AccessToken, Credential, TenantId, TokenGrant};
use crate::storage::{SyncStore, into_fields, to_fields};

/// Longest access-token lifetime accepted from the token endpoint
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 24 * 60 * 60;

/// Expiry for a token issued at `now` that the endpoint says lives `expires_in` seconds
///
/// The reported lifetime is capped at [`MAX_TOKEN_LIFETIME_SECS`].
pub fn token_expiry(now: DateTime<Utc>, expires_in: u64) -> DateTime<Utc> {
    if expires_in > MAX_TOKEN_LIFETIME_SECS {
        warn!(
            "Token endpoint reported a {}s lifetime, capping at {}s",
            expires_in, MAX_TOKEN_LIFETIME_SECS
        );
    }
    let secs = expires_in.min(MAX_TOKEN_LIFETIME_SECS) as i64;
    now.checked_add_signed(Duration::seconds(secs)).unwrap_or(now)
}

/// OAuth2 token endpoint operations the manager depends on
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange a refresh token for a fresh access token
    ///
    /// Must fail with `AuthRevoked` when the refresh token is invalid and
    /// `TransientAuth` when the endpoint could not be reached.
    async fn refresh(&self, refresh_token: &str) -> SyncResult<TokenGrant>;
}

/// Per-tenant access-token cache backed by the credential document
pub struct TokenManager {
    store: Arc<dyn SyncStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    margin: Duration,
}

impl TokenManager {
    pub fn new(store: Arc<dyn SyncStore>, endpoint: Arc<dyn TokenEndpoint>, margin: Duration) -> Self {
        Self {
            store,
            endpoint,
            margin,
        }
    }

    /// Get a valid access token for `tenant`
    pub async fn get_access_token(&self, tenant: &TenantId) -> SyncResult<AccessToken> {
        let credential = self
            .store
            .get_credential(tenant)
            .await?
            .ok_or_else(|| SyncError::CredentialMissing(tenant.clone()))?;

        let now = Utc::now();
        if let Some(token) = credential.usable_access_token(now, self.margin) {
            return Ok(token);
        }

        debug!("Access token for tenant {} is stale, refreshing", tenant);
        let grant = self.endpoint.refresh(&credential.refresh_token).await?;

        if grant.refresh_token.as_deref().is_some_and(|t| t != credential.refresh_token) {
            // Only an explicit re-authorization replaces the stored refresh token
            warn!("Ignoring rotated refresh token for tenant {}", tenant);
        }

        let expires_at = token_expiry(now, grant.expires_in);
        let mut fields = json!({
            "access_token": grant.access_token.as_str(),
            "access_token_expires_at": expires_at,
        });
        if let Some(scope) = &grant.scope {
            fields["scope"] = json!(scope);
        }
        self.store
            .merge_credential(tenant, into_fields(fields))
            .await?;

        info!(
            "Refreshed access token for tenant {} (expires {})",
            tenant,
            expires_at.format("%H:%M:%S")
        );
        Ok(grant.access_token)
    }

    /// Drop the cached access token so the next call refreshes
    ///
    /// Used after the provider rejects a token the cache still considered valid.
    pub async fn invalidate_cached_token(&self, tenant: &TenantId) -> SyncResult<()> {
        let fields = json!({ "access_token": null, "access_token_expires_at": null });
        self.store
            .merge_credential(tenant, into_fields(fields))
            .await?;
        Ok(())
    }

    /// Store the result of an authorization-code grant
    ///
    /// This is the only operation that writes the refresh token.
    pub async fn store_grant(&self, tenant: &TenantId, grant: &TokenGrant) -> SyncResult<()> {
        let refresh_token = grant.refresh_token.clone().ok_or_else(|| {
            SyncError::ProviderProtocol("grant has no refresh token to store".into())
        })?;

        let now = Utc::now();
        let credential = Credential {
            refresh_token,
            access_token: Some(grant.access_token.as_str().to_string()),
            access_token_expires_at: Some(token_expiry(now, grant.expires_in)),
            scope: grant.scope.clone(),
            granted_at: Some(now),
        };
        self.store
            .merge_credential(tenant, to_fields(&credential)?)
            .await?;

        info!("Stored new credential for tenant {}", tenant);
        Ok(())
    }
}
