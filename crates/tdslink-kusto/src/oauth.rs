//! OAuth2 client-credentials token acquisition against Microsoft Entra ID.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tdslink_core::{ConnectorError, Result};
use tracing::{debug, info};
use url::Url;

/// `https://{host}/.default`, the scope requested for a cluster.
pub fn scope_for_host(host_name: &str) -> String {
    format!("https://{}/.default", host_name)
}

/// `{authority_host}/{tenant_id}`, validated as a URL.
pub fn authority_url(authority_host: &str, tenant_id: &str) -> Result<Url> {
    if tenant_id.is_empty() || tenant_id.contains(['/', '?', '#']) {
        return Err(ConnectorError::Authentication(format!(
            "invalid tenant id '{}'",
            tenant_id
        )));
    }
    let raw = format!("{}/{}", authority_host.trim_end_matches('/'), tenant_id);
    let url = Url::parse(&raw).map_err(|e| {
        ConnectorError::Authentication(format!("malformed authority URL '{}': {}", raw, e))
    })?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "https" | "http") {
        return Err(ConnectorError::Authentication(format!(
            "malformed authority URL '{}'",
            raw
        )));
    }
    Ok(url)
}

/// Token endpoint of an authority: `{authority}/oauth2/v2.0/token`.
pub fn token_endpoint(authority: &Url) -> String {
    format!("{}/oauth2/v2.0/token", authority.as_str().trim_end_matches('/'))
}

/// Application identity presented to the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

/// Bearer token plus the instant it stops being valid.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True when the token remains valid for at least `margin` from `now`.
    pub fn is_valid_for(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.expires_at - margin > now
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of access tokens for a (credentials, scope) pair.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire(&self, credentials: &ClientCredentials, scope: &str) -> Result<AccessToken>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<ExpiresIn>,
}

// v1 endpoints send `expires_in` as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(i64),
    Text(String),
}

impl ExpiresIn {
    fn seconds(&self) -> Option<i64> {
        match self {
            ExpiresIn::Seconds(s) => Some(*s),
            ExpiresIn::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// `now + seconds`, or `None` for non-positive or unrepresentable lifetimes.
fn expiry_after(seconds: i64) -> Option<DateTime<Utc>> {
    if seconds <= 0 {
        return None;
    }
    Utc::now().checked_add_signed(chrono::Duration::try_seconds(seconds)?)
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// HTTP client for the identity provider's token endpoint.
pub struct TokenClient {
    authority_host: String,
    http: reqwest::Client,
}

impl TokenClient {
    pub fn new(authority_host: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            authority_host: authority_host.into(),
            http,
        })
    }

    pub fn authority_host(&self) -> &str {
        &self.authority_host
    }
}

#[async_trait]
impl TokenProvider for TokenClient {
    async fn acquire(&self, credentials: &ClientCredentials, scope: &str) -> Result<AccessToken> {
        let authority = authority_url(&self.authority_host, &credentials.tenant_id)?;
        let endpoint = token_endpoint(&authority);
        debug!(
            "Requesting token from {} for client {} scope {}",
            endpoint, credentials.client_id, scope
        );

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("scope", scope),
        ];
        let response = self
            .http
            .post(&endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| ConnectorError::Authentication(format!("token request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ConnectorError::Authentication(format!("failed to read token response: {}", e))
        })?;

        if !status.is_success() {
            let detail = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {}", err.error, description),
                    None => err.error,
                },
                Err(_) => body,
            };
            return Err(ConnectorError::Authentication(format!(
                "token endpoint returned {}: {}",
                status, detail
            )));
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            ConnectorError::Authentication(format!("malformed token response: {}", e))
        })?;
        let secret = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ConnectorError::Authentication("token response has no access_token".to_string())
            })?;
        if let Some(token_type) = &parsed.token_type {
            if !token_type.eq_ignore_ascii_case("bearer") {
                return Err(ConnectorError::Authentication(format!(
                    "unsupported token type '{}'",
                    token_type
                )));
            }
        }
        let expires_at = parsed
            .expires_in
            .as_ref()
            .and_then(ExpiresIn::seconds)
            .and_then(expiry_after)
            .ok_or_else(|| {
                ConnectorError::Authentication("token response has no valid expires_in".to_string())
            })?;
        info!(
            "Acquired token for client {} (expires {})",
            credentials.client_id, expires_at
        );
        Ok(AccessToken::new(secret, expires_at))
    }
}
