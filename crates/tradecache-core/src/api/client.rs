//! API client for the backend's `/preferences` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::{debug, warn};

use super::ApiError;
use crate::models::RemotePreference;

// ============================================================================
// Constants
// ============================================================================

/// Per-request timeout; bounds how long a pull or push holds its in-flight flag.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const PREFERENCES_PATH: &str = "/preferences";

/// Where the coordinator pulls and pushes the chart session.
#[async_trait]
pub trait PreferencesApi: Send + Sync {
    async fn fetch_preferences(&self) -> Result<RemotePreference, ApiError>;

    /// Fire-and-forget from the caller's side; no response body is read.
    async fn push_preferences(&self, preferences: &RemotePreference) -> Result<(), ApiError>;
}

/// HTTP implementation of `PreferencesApi`. Clones share one connection pool.
#[derive(Clone)]
pub struct PreferencesClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl PreferencesClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Same connection pool, different token.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    fn url(&self) -> String {
        format!("{}{}", self.base_url, PREFERENCES_PATH)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(ref token) = self.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidResponse("Bearer token is not a valid header".to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Send `build()` until it isn't rate limited, backing off exponentially.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build().headers(self.auth_headers()?).send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }
            if status != StatusCode::TOO_MANY_REQUESTS {
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::from_status(status, &body));
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(url = %self.url(), retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2;
        }
    }
}

#[async_trait]
impl PreferencesApi for PreferencesClient {
    async fn fetch_preferences(&self) -> Result<RemotePreference, ApiError> {
        let url = self.url();
        let response = self.send_with_retry(|| self.client.get(&url)).await?;
        let text = response.text().await?;
        debug!("Preferences response received");
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse preferences: {}", e)))
    }

    async fn push_preferences(&self, preferences: &RemotePreference) -> Result<(), ApiError> {
        let url = self.url();
        self.send_with_retry(|| self.client.put(&url).json(preferences))
            .await?;
        debug!(pair = %preferences.last_selected_pair, "Preferences pushed");
        Ok(())
    }
}
