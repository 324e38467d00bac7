//! Source fetcher for the historical weather API.
//!
//! Issues `GET <api.url>?dt=<date>&q=<city>&key=<key>` with a fixed request
//! timeout. Successful documents go through a [`FetchCache`] keyed by the
//! fetcher identity and the (date, city) pair, so an identical call inside
//! the cache window does not reach the network.
//!
//! Failures are logged with the offending date and city and returned as
//! [`UpstreamFetchError`]; retrying is the caller's decision.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::cache::{CacheKey, FetchCache};
use crate::config::ApiConfig;
use crate::error::UpstreamFetchError;
use crate::models::{RunParams, WeatherDocument};

const FETCHER_NAME: &str = "get_weather_history";
const LOGGED_BODY_CHARS: usize = 500;

pub struct SourceFetcher {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    identity: String,
    cache: Arc<FetchCache>,
}

impl SourceFetcher {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        cache: Arc<FetchCache>,
    ) -> Result<Self> {
        let api_url = api_url.into();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            identity: fetcher_identity(FETCHER_NAME, &api_url),
            client,
            api_url,
            api_key: api_key.into(),
            cache,
        })
    }

    /// Build a fetcher with its own cache from the `[api]` section.
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(
            config.url.clone(),
            config.resolve_key()?,
            config.timeout(),
            Arc::new(FetchCache::new(config.cache_ttl())),
        )
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn fetch(&self, params: &RunParams) -> Result<WeatherDocument, UpstreamFetchError> {
        let date = params.date_str();
        let city = params.city.as_str();
        let key = CacheKey {
            fetcher: self.identity.clone(),
            date: date.clone(),
            city: city.to_string(),
        };

        if let Some(doc) = self.cache.get(&key) {
            info!("Cache hit for weather history of {} on {}", city, date);
            return Ok(doc);
        }

        info!("Getting weather history for {} on {}", city, date);
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("dt", date.as_str()),
                ("q", city),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                // The request URL carries the API key.
                let source = e.without_url();
                error!(
                    "Error getting weather history for {} on {}: {}",
                    city, date, source
                );
                UpstreamFetchError::Request {
                    date: date.clone(),
                    city: city.to_string(),
                    source,
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(
                "Error getting weather history for {} on {}: HTTP {}",
                city, date, status
            );
            return Err(UpstreamFetchError::Status {
                date,
                city: city.to_string(),
                status,
            });
        }
        info!("Response status: {}", status);

        let body = response.text().await.map_err(|e| {
            let source = e.without_url();
            error!(
                "Error reading weather history for {} on {}: {}",
                city, date, source
            );
            UpstreamFetchError::Request {
                date: date.clone(),
                city: city.to_string(),
                source,
            }
        })?;
        info!(
            "Response text: {}",
            body.chars().take(LOGGED_BODY_CHARS).collect::<String>()
        );

        let doc: WeatherDocument = serde_json::from_str(&body).map_err(|source| {
            error!(
                "Weather history for {} on {} is not valid JSON: {}",
                city, date, source
            );
            UpstreamFetchError::Decode {
                date: date.clone(),
                city: city.to_string(),
                source,
            }
        })?;

        self.cache.insert(key, doc.clone());
        Ok(doc)
    }
}

/// Hex SHA-256 over the fetcher name and the endpoint it talks to.
fn fetcher_identity(name: &str, api_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\n");
    hasher.update(api_url.as_bytes());
    format!("{:x}", hasher.finalize())
}
