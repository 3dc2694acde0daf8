//! OAuth2 token endpoint access
//!
//! Refresh-token and authorization-code grants against the provider's token
//! endpoint. Uses synchronous HTTP (ureq) on the blocking pool.

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::time::Duration;
use ureq::Agent;
use url::Url;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{AccessToken, TokenGrant};
use crate::token::TokenEndpoint;

/// Token response from the OAuth2 endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Error body from the OAuth2 endpoint
#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Lifetime assumed when the endpoint omits `expires_in`
const DEFAULT_EXPIRES_IN: u64 = 3600;

/// OAuth2 client for one registered application
#[derive(Clone)]
pub struct OAuthClient {
    agent: Agent,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_url: String,
    token_url: String,
    scopes: Vec<String>,
    timeout: Duration,
}

impl OAuthClient {
    pub fn new(config: &SyncConfig) -> Self {
        let timeout = config.request_timeout();
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            agent,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
            scopes: config.scopes.clone(),
            timeout,
        }
    }

    /// Consent URL the tenant's administrator opens to grant offline access
    pub fn authorize_url(&self, state: &str) -> SyncResult<String> {
        let mut url = Url::parse(&self.auth_url)
            .map_err(|e| SyncError::ProviderProtocol(format!("invalid auth_url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state);
        Ok(url.into())
    }

    /// Exchange an authorization code for a grant carrying a refresh token
    pub async fn exchange_code(&self, code: &str) -> SyncResult<TokenGrant> {
        let form = vec![
            ("client_id".to_string(), self.client_id.clone()),
            ("client_secret".to_string(), self.client_secret.clone()),
            ("code".to_string(), code.to_string()),
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("redirect_uri".to_string(), self.redirect_uri.clone()),
        ];
        let grant = self.post_form(form).await?;
        if grant.refresh_token.is_none() {
            return Err(SyncError::ProviderProtocol(
                "authorization grant did not include a refresh token".into(),
            ));
        }
        Ok(grant)
    }

    async fn post_form(&self, form: Vec<(String, String)>) -> SyncResult<TokenGrant> {
        let agent = self.agent.clone();
        let url = self.token_url.clone();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let mut response = agent
                .post(&url)
                .send_form(form)
                .map_err(|e| match e {
                    ureq::Error::Timeout(_) => {
                        SyncError::TransientAuth(format!("token endpoint timed out after {:?}", timeout))
                    }
                    other => SyncError::TransientAuth(format!("token endpoint unreachable: {}", other)),
                })?;

            let status = response.status().as_u16();
            let body = response
                .body_mut()
                .read_to_string()
                .map_err(|e| SyncError::TransientAuth(format!("failed to read token response: {}", e)))?;

            parse_token_response(status, &body)
        })
        .await
        .map_err(|e| SyncError::TransientAuth(format!("token request task failed: {}", e)))?
    }
}

/// Interpret a token endpoint response
pub(crate) fn parse_token_response(status: u16, body: &str) -> SyncResult<TokenGrant> {
    if (200..300).contains(&status) {
        let token: TokenResponse = serde_json::from_str(body)
            .map_err(|e| SyncError::TransientAuth(format!("malformed token response: {}", e)))?;
        return Ok(TokenGrant {
            access_token: AccessToken::new(token.access_token),
            expires_in: token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
            refresh_token: token.refresh_token,
            scope: token.scope,
        });
    }

    let error: TokenErrorResponse = serde_json::from_str(body).unwrap_or_default();
    let detail = match &error.error_description {
        Some(desc) => format!("{}: {}", error.error, desc),
        None if error.error.is_empty() => format!("HTTP {}", status),
        None => error.error.clone(),
    };

    match status {
        400 | 401 if error.error == "invalid_grant" || error.error == "unauthorized_client" => {
            warn!("Refresh token rejected: {}", detail);
            Err(SyncError::AuthRevoked(detail))
        }
        429 | 500..=599 => Err(SyncError::TransientAuth(detail)),
        _ => Err(SyncError::Provider {
            status,
            message: detail,
        }),
    }
}

#[async_trait]
impl TokenEndpoint for OAuthClient {
    async fn refresh(&self, refresh_token: &str) -> SyncResult<TokenGrant> {
        debug!("Refreshing access token");
        let form = vec![
            ("client_id".to_string(), self.client_id.clone()),
            ("client_secret".to_string(), self.client_secret.clone()),
            ("refresh_token".to_string(), refresh_token.to_string()),
            ("grant_type".to_string(), "refresh_token".to_string()),
        ];
        self.post_form(form).await
    }
}
