//! OAuth2 client-credentials token cache
//!
//! TigerStyle: Tokens cached per client id with an absolute expiry.
//!
//! Token servers disagree on where client credentials go, so both placements
//! are tried concurrently and the first success wins.

use futures::future::{self, BoxFuture, FutureExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};
use utcp_core::{Error, OAuth2Auth, Result};

/// Lifetime assumed when the token response has no `expires_in`
pub const OAUTH2_TOKEN_EXPIRY_SECONDS_DEFAULT: u64 = 3600;

/// Longest lifetime honoured for a cached token (30 days)
pub const OAUTH2_TOKEN_EXPIRY_SECONDS_MAX: u64 = 30 * 24 * 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// In-memory OAuth2 token cache keyed by client id
#[derive(Debug, Default)]
pub struct OAuth2TokenCache {
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl OAuth2TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a valid token, fetching one if the cached entry is missing or expired
    pub async fn get_token(&self, client: &reqwest::Client, auth: &OAuth2Auth) -> Result<String> {
        // Held across the fetch so concurrent callers share one token request
        let mut tokens = self.tokens.lock().await;

        if let Some(cached) = tokens.get(&auth.client_id) {
            if cached.expires_at > Instant::now() {
                debug!(client_id = %auth.client_id, "Using cached OAuth2 token");
                return Ok(cached.access_token.clone());
            }
        }

        let response = fetch_token(client, auth).await?;
        let lifetime = response
            .expires_in
            .unwrap_or(OAUTH2_TOKEN_EXPIRY_SECONDS_DEFAULT)
            .min(OAUTH2_TOKEN_EXPIRY_SECONDS_MAX);
        info!(client_id = %auth.client_id, expires_in = lifetime, "Fetched OAuth2 token");

        tokens.insert(
            auth.client_id.clone(),
            CachedToken {
                access_token: response.access_token.clone(),
                expires_at: Instant::now() + Duration::from_secs(lifetime),
            },
        );
        Ok(response.access_token)
    }

    /// Drop every cached token
    pub async fn clear(&self) {
        self.tokens.lock().await.clear();
    }

    /// Number of cached tokens
    pub async fn len(&self) -> usize {
        self.tokens.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn fetch_token(client: &reqwest::Client, auth: &OAuth2Auth) -> Result<TokenResponse> {
    let strategies: Vec<BoxFuture<'_, Result<TokenResponse>>> = vec![
        credentials_in_body(client, auth).boxed(),
        credentials_in_header(client, auth).boxed(),
    ];

    future::select_ok(strategies)
        .await
        .map(|(token, _pending)| token)
        .map_err(|e| Error::transport("http", format!("OAuth2 token request failed: {}", e)))
}

async fn credentials_in_body(client: &reqwest::Client, auth: &OAuth2Auth) -> Result<TokenResponse> {
    let mut form = vec![
        ("grant_type", "client_credentials"),
        ("client_id", auth.client_id.as_str()),
        ("client_secret", auth.client_secret.as_str()),
    ];
    if let Some(scope) = &auth.scope {
        form.push(("scope", scope.as_str()));
    }
    send_token_request(client.post(&auth.token_url).form(&form)).await
}

async fn credentials_in_header(client: &reqwest::Client, auth: &OAuth2Auth) -> Result<TokenResponse> {
    let mut form = vec![("grant_type", "client_credentials")];
    if let Some(scope) = &auth.scope {
        form.push(("scope", scope.as_str()));
    }
    send_token_request(
        client
            .post(&auth.token_url)
            .basic_auth(&auth.client_id, Some(&auth.client_secret))
            .form(&form),
    )
    .await
}

async fn send_token_request(request: reqwest::RequestBuilder) -> Result<TokenResponse> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::transport("http", e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::transport(
            "http",
            format!("token endpoint returned {}: {}", status.as_u16(), body),
        ));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::transport("http", format!("invalid token response: {}", e)))
}
