//! HTTP client for the price feed API.

use crate::error::Error;
use crate::types::*;
use reqwest::Client;
use std::time::Duration;


/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API (e.g., "http://localhost:3001").
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the Price Feed API.
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: Client,
    base_url: String,
}

impl FeedClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Creates a new client for `base_url` with default settings.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn with_base_url(base_url: &str) -> Result<Self, Error> {
        Self::new(ClientConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        })
    }

    /// The base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Performs a health check.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn health_check(&self) -> Result<HealthResponse, Error> {
        let url = format!("{}/health", self.base_url);
        let resp = self.client.get(&url).send().await?;
        self.handle_response(resp).await
    }

    /// Lists active instruments.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn list_instruments(&self) -> Result<InstrumentsListResponse, Error> {
        let url = format!("{}/api/v1/instruments", self.base_url);
        let resp = self.client.get(&url).send().await?;
        self.handle_response(resp).await
    }

    /// Gets recent price points for a symbol, newest first.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for unknown symbols, or an error if the
    /// request fails.
    pub async fn price_history(
        &self,
        symbol: &str,
        query: &HistoryQuery,
    ) -> Result<PriceHistoryResponse, Error> {
        let url = self.history_url(symbol, query)?;
        let resp = self.client.get(&url).send().await?;
        self.handle_response(resp).await
    }

    /// Gets connection, room and delivery counters.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn realtime_stats(&self) -> Result<RealtimeStatsResponse, Error> {
        let url = format!("{}/api/v1/realtime/stats", self.base_url);
        let resp = self.client.get(&url).send().await?;
        self.handle_response(resp).await
    }

    fn history_url(&self, symbol: &str, query: &HistoryQuery) -> Result<String, Error> {
        let mut url = format!("{}/api/v1/instruments/{}/history", self.base_url, symbol);
        let query_string = serde_urlencoded::to_string(query)?;
        if !query_string.is_empty() {
            url.push('?');
            url.push_str(&query_string);
        }
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, Error> {
        let status = resp.status();

        if status.is_success() {
            Ok(resp.json().await?)
        } else if status.as_u16() == 404 {
            let text = resp.text().await.unwrap_or_default();
            Err(Error::NotFound(text))
        } else {
            let text = resp.text().await.unwrap_or_default();
            Err(Error::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }
}
