use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdbridge_core::config::RdStationConfig;
use rdbridge_core::dispatch::ContactApi;
use rdbridge_core::domain::contact::ContactPayload;
use rdbridge_core::errors::IntegrationError;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::RdError;
use crate::retry::RetryPolicy;
use crate::token::TokenManager;

#[derive(Clone, Debug)]
pub struct RdStationSettings {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
    pub timeout: Duration,
    pub user_agent: String,
    pub retry: RetryPolicy,
}

impl From<&RdStationConfig> for RdStationSettings {
    fn from(config: &RdStationConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            user_agent: config.user_agent.clone(),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                backoff_base: Duration::from_millis(config.backoff_base_ms),
                jitter: Duration::from_millis(config.jitter_ms),
            },
        }
    }
}

/// One pooled HTTP client shared by the token exchange and every API call.
#[derive(Clone, Debug)]
pub struct RdStationClient {
    http: Client,
    base_url: Url,
    tokens: Arc<TokenManager>,
    retry: RetryPolicy,
}

impl RdStationClient {
    pub fn new(settings: RdStationSettings) -> Result<Self, RdError> {
        let base_url = Url::parse(settings.base_url.trim_end_matches('/'))
            .map_err(|_| RdError::InvalidUrl(settings.base_url.clone()))?;
        if base_url.cannot_be_a_base() {
            return Err(RdError::InvalidUrl(settings.base_url));
        }

        let http = Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent)
            .build()?;
        let tokens = TokenManager::new(
            http.clone(),
            base_url.as_str(),
            settings.client_id,
            settings.client_secret,
            settings.refresh_token,
        );

        Ok(Self { http, base_url, tokens: Arc::new(tokens), retry: settings.retry })
    }

    pub fn from_config(config: &RdStationConfig) -> Result<Self, RdError> {
        Self::new(RdStationSettings::from(config))
    }

    /// Sends `body` as JSON to `path` (relative to the base URL) with a bearer
    /// token, retrying transport failures, 429 and 5xx up to the configured
    /// limit. A 401 triggers one token refresh and an immediate resend that does
    /// not count as a retry. Whatever status remains is returned unchanged.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, RdError> {
        let url = self.url_for(path)?;
        self.execute(method, url, body).await
    }

    /// PATCH by e-mail, creating the contact when RD answers 404.
    pub async fn upsert_contact_by_email(
        &self,
        email: &str,
        payload: &ContactPayload,
    ) -> Result<Value, RdError> {
        let body =
            serde_json::to_value(payload).map_err(|error| RdError::Decode(error.to_string()))?;
        let contact_key = format!("email:{email}");
        let response = self
            .execute(Method::PATCH, self.contacts_url(&[&contact_key])?, Some(&body))
            .await?;

        let response = if response.status() == StatusCode::NOT_FOUND {
            debug!(event_name = "rdstation.contact.missing", "contact not found; creating it");
            let create = serde_json::to_value(payload.with_email(email))
                .map_err(|error| RdError::Decode(error.to_string()))?;
            let created = self.execute(Method::POST, self.contacts_url(&[])?, Some(&create)).await?;
            if created.status().is_success() {
                info!(event_name = "rdstation.contact.created", "contact created in RD Station");
            }
            created
        } else {
            response
        };

        decode_success(response).await
    }

    pub async fn add_tags(
        &self,
        identifier: &str,
        value: &str,
        tags: &[String],
    ) -> Result<Value, RdError> {
        let contact_key = format!("{identifier}:{value}");
        let url = self.contacts_url(&[&contact_key, "tag"])?;
        let response = self.execute(Method::POST, url, Some(&json!({ "tags": tags }))).await?;
        decode_success(response).await
    }

    /// `None` when RD has no contact for the address.
    pub async fn get_contact_by_email(&self, email: &str) -> Result<Option<Value>, RdError> {
        let contact_key = format!("email:{email}");
        let response = self.execute(Method::GET, self.contacts_url(&[&contact_key])?, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode_success(response).await.map(Some)
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Response, RdError> {
        let mut attempt = 0_u32;
        let mut refreshed = false;

        loop {
            let token = self.tokens.get_token().await?;
            let mut builder =
                self.http.request(method.clone(), url.clone()).bearer_auth(token.expose_secret());
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(error) if attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt, None);
                    warn!(
                        event_name = "rdstation.request.retry",
                        method = %method,
                        path = url.path(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transport failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                Err(error) => return Err(RdError::Transport(error)),
            };

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !refreshed {
                refreshed = true;
                debug!(
                    event_name = "rdstation.request.unauthorized",
                    method = %method,
                    path = url.path(),
                    "access token rejected; refreshing once"
                );
                self.tokens.force_refresh(&token).await?;
                continue;
            }

            if RetryPolicy::is_retryable_status(status) && attempt < self.retry.max_retries {
                let retry_after = response.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok());
                let delay = self.retry.delay_for(attempt, retry_after);
                warn!(
                    event_name = "rdstation.request.retry",
                    method = %method,
                    path = url.path(),
                    status = status.as_u16(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retryable status; backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Ok(response);
        }
    }

    fn url_for(&self, path: &str) -> Result<Url, RdError> {
        let joined = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(|_| RdError::InvalidUrl(joined))
    }

    /// `/platform/contacts/<segments>`, each segment percent-encoded.
    fn contacts_url(&self, segments: &[&str]) -> Result<Url, RdError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RdError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["platform", "contacts"])
            .extend(segments);
        Ok(url)
    }
}

async fn decode_success(response: Response) -> Result<Value, RdError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        return Err(RdError::Upstream { status: status.as_u16(), body: text });
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|error| RdError::Decode(error.to_string()))
}

#[async_trait]
impl ContactApi for RdStationClient {
    async fn upsert_contact_by_email(
        &self,
        email: &str,
        payload: &ContactPayload,
    ) -> Result<Value, IntegrationError> {
        RdStationClient::upsert_contact_by_email(self, email, payload).await.map_err(Into::into)
    }

    async fn add_tags(
        &self,
        identifier: &str,
        value: &str,
        tags: &[String],
    ) -> Result<Value, IntegrationError> {
        RdStationClient::add_tags(self, identifier, value, tags).await.map_err(Into::into)
    }
}
