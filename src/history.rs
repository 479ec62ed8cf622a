//! Historical readings fetch.
//!
//! The relay's HTTP side serves recent readings at `GET /api/data` as a JSON
//! array, newest first. The dashboard seeds its history from it on startup.

use anyhow::{Context, Result};
use reqwest::Client;

use crate::constants;
use crate::envelope::Telemetry;

/// HTTP client for the historical data endpoint.
#[derive(Debug, Clone)]
pub struct HistoryClient {
    client: Client,
    base_url: String,
}

impl HistoryClient {
    /// Create a client for `base_url` (e.g. `http://localhost:8000`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a client with a pre-configured HTTP client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch up to `limit` recent readings, newest first.
    pub async fn fetch_recent(&self, limit: usize) -> Result<Vec<Telemetry>> {
        let url = format!("{}/api/data", self.base_url);
        log::debug!("[history] GET {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("History request failed: {status}");
        }

        let readings: Vec<Telemetry> = response
            .json()
            .await
            .context("Failed to decode historical readings")?;

        log::info!("[history] Loaded {} readings", readings.len().min(limit));
        Ok(readings.into_iter().take(limit).collect())
    }
}

/// Fetch up to `limit` recent readings from `base_url`.
pub async fn fetch_recent(base_url: &str, limit: usize) -> Result<Vec<Telemetry>> {
    HistoryClient::new(base_url)?.fetch_recent(limit).await
}
