//! OAuth access-token lifecycle for the RD Station API.
//!
//! The refresh path runs under the state lock, so concurrent callers that find
//! the token stale wait for one exchange instead of racing their own.

use std::time::{Duration, Instant};

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::RdError;

/// Tokens within this window of expiry are treated as expired.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(30);
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 900;
const MAX_EXPIRES_IN_SECS: u64 = 24 * 60 * 60;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    access_token: SecretString,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + EXPIRY_MARGIN < self.expires_at
    }
}

struct TokenState {
    refresh_token: SecretString,
    cached: Option<CachedToken>,
}

pub struct TokenManager {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    state: Mutex<TokenState>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(
        http: Client,
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: SecretString,
        refresh_token: SecretString,
    ) -> Self {
        Self {
            http,
            token_url: format!("{}/auth/token", base_url.trim_end_matches('/')),
            client_id: client_id.into(),
            client_secret,
            state: Mutex::new(TokenState { refresh_token, cached: None }),
        }
    }

    /// Cached access token, refreshed first when absent or about to expire.
    pub async fn get_token(&self) -> Result<SecretString, RdError> {
        let mut state = self.state.lock().await;
        if let Some(cached) = state.cached.as_ref().filter(|cached| cached.is_fresh(Instant::now()))
        {
            return Ok(cached.access_token.clone());
        }
        self.refresh_locked(&mut state).await
    }

    /// Refresh after `stale` was rejected. If another caller already replaced
    /// it, the newer token is returned without a second exchange.
    pub async fn force_refresh(&self, stale: &SecretString) -> Result<SecretString, RdError> {
        let mut state = self.state.lock().await;
        if let Some(cached) = state.cached.as_ref() {
            let replaced = cached.access_token.expose_secret() != stale.expose_secret();
            if replaced && cached.is_fresh(Instant::now()) {
                return Ok(cached.access_token.clone());
            }
        }
        self.refresh_locked(&mut state).await
    }

    async fn refresh_locked(&self, state: &mut TokenState) -> Result<SecretString, RdError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("refresh_token", state.refresh_token.expose_secret()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|error| {
                warn!(
                    event_name = "rdstation.token.refresh_failed",
                    error = %error,
                    "token refresh request failed"
                );
                RdError::Auth(format!("token request failed: {error}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                event_name = "rdstation.token.refresh_failed",
                status = status.as_u16(),
                "token endpoint rejected the refresh token"
            );
            return Err(RdError::Auth(format!("token endpoint returned {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|error| RdError::Auth(format!("failed to decode token response: {error}")))?;
        if token.access_token.trim().is_empty() {
            return Err(RdError::Auth("token endpoint returned empty access token".to_string()));
        }

        if let Some(rotated) = token.refresh_token.filter(|value| !value.trim().is_empty()) {
            state.refresh_token = rotated.into();
        }

        let expires_in = token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS).min(MAX_EXPIRES_IN_SECS);
        let access_token = SecretString::from(token.access_token);
        state.cached = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        });

        info!(
            event_name = "rdstation.token.refreshed",
            expires_in_secs = expires_in,
            "RD Station access token refreshed"
        );
        Ok(access_token)
    }
}
