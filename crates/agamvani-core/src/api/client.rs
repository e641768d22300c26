//! HTTP client for the radio REST API.
//!
//! `ApiClient` implements both [`RadioSource`] and [`ImageSource`], so one
//! connection pool serves the poller, the schedule fetch and artwork loads.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::models::{NowPlayingResponse, ScheduleSnapshot};

use super::FetchError;

// ============================================================================
// Constants
// ============================================================================

/// Now-playing endpoint, relative to the API base URL
const NOW_PLAYING_PATH: &str = "/api/radio/now-playing";

/// Daily schedule endpoint, relative to the API base URL
const DAILY_SCHEDULE_PATH: &str = "/api/radio/daily-schedule";

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

// ============================================================================
// Source traits
// ============================================================================

/// Remote source of live radio state.
#[async_trait]
pub trait RadioSource: Send + Sync {
    async fn now_playing(&self) -> Result<NowPlayingResponse, FetchError>;

    async fn daily_schedule(&self) -> Result<ScheduleSnapshot, FetchError>;
}

/// Remote source of binary artwork.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch_image(&self, url: &str) -> Result<FetchedImage, FetchError>;
}

/// Raw image response body.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// API client for the radio service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client against `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Url::parse(base_url).with_context(|| format!("Invalid API base URL: {}", base_url))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve an image or API path. Absolute `http(s)` URLs pass through,
    /// anything else is appended to the base URL.
    pub fn resolve_url(&self, path: &str) -> Result<Url, FetchError> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };
        Url::parse(&raw).map_err(|e| FetchError::InvalidResponse(format!("Bad URL {}: {}", raw, e)))
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, FetchError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::from_status(status, &body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::from_status(status, &body))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = self.resolve_url(path)?;
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(url.clone())
                .header(header::ACCEPT, "application/json")
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let text = response.text().await?;
                    return serde_json::from_str(&text).map_err(|e| {
                        FetchError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e))
                    });
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(FetchError::RateLimited);
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }
}

#[async_trait]
impl RadioSource for ApiClient {
    async fn now_playing(&self) -> Result<NowPlayingResponse, FetchError> {
        self.get_json(NOW_PLAYING_PATH).await
    }

    async fn daily_schedule(&self) -> Result<ScheduleSnapshot, FetchError> {
        let schedule: ScheduleSnapshot = self.get_json(DAILY_SCHEDULE_PATH).await?;
        debug!(date = %schedule.date, slots = schedule.slots.len(), "Daily schedule fetched");
        Ok(schedule)
    }
}

#[async_trait]
impl ImageSource for ApiClient {
    async fn fetch_image(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let url = self.resolve_url(url)?;
        let response = self.client.get(url.clone()).send().await?;
        let response = Self::check_response(response).await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        debug!(url = %url, size = bytes.len(), "Image downloaded");

        Ok(FetchedImage { bytes, content_type })
    }
}
