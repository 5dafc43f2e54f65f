//! HTTP transport for both sources.

use crate::error::FeedError;
use crate::feed::{ByteStream, FeedTransport};
use crate::models::SourceKind;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Where the two sources live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub base_url: String,
    pub trends_stream: String,
    pub trends_fallback: String,
    pub incidents_stream: String,
    pub incidents_fallback: String,
}

impl Endpoints {
    pub fn stream_url(&self, source: SourceKind) -> String {
        match source {
            SourceKind::Trends => self.join(&self.trends_stream),
            SourceKind::Incidents => self.join(&self.incidents_stream),
        }
    }

    pub fn fallback_url(&self, source: SourceKind) -> String {
        match source {
            SourceKind::Trends => self.join(&self.trends_fallback),
            SourceKind::Incidents => self.join(&self.incidents_fallback),
        }
    }

    fn join(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            trends_stream: "/getHealthTrendsStream".to_string(),
            trends_fallback: "/getHealthTrends".to_string(),
            incidents_stream: "/searchHealthTrendsStream".to_string(),
            incidents_fallback: "/searchHealthTrends".to_string(),
        }
    }
}

/// `reqwest` backed transport.
///
/// Streams carry only a connect timeout since they stay open for as long as
/// upstream keeps producing; stalls are caught by the channel's idle limit.
/// Fallback requests get a full request timeout.
pub struct HttpTransport {
    endpoints: Endpoints,
    stream_client: reqwest::Client,
    fallback_client: reqwest::Client,
    connect_timeout: Duration,
    fallback_timeout: Duration,
}

impl HttpTransport {
    pub fn new(
        endpoints: Endpoints,
        connect_timeout: Duration,
        fallback_timeout: Duration,
    ) -> Result<Self, FeedError> {
        let stream_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| FeedError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        let fallback_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(fallback_timeout)
            .build()
            .map_err(|e| FeedError::Fallback(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoints,
            stream_client,
            fallback_client,
            connect_timeout,
            fallback_timeout,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Limit that applies when a request times out. Streams only ever carry
    /// the connect limit.
    fn timeout_limit(&self, connecting: bool, whole_request: bool) -> Duration {
        if whole_request && !connecting {
            self.fallback_timeout
        } else {
            self.connect_timeout
        }
    }

    fn describe(&self, e: &reqwest::Error, url: &str, whole_request: bool) -> String {
        if e.is_timeout() {
            format!(
                "Request to {} timed out after {}s",
                url,
                self.timeout_limit(e.is_connect(), whole_request).as_secs()
            )
        } else if e.is_connect() {
            format!("Cannot connect to {}", url)
        } else {
            format!("Request to {} failed: {}", url, e)
        }
    }
}

#[async_trait]
impl FeedTransport for HttpTransport {
    async fn subscribe(&self, source: SourceKind, query: &str) -> Result<ByteStream, FeedError> {
        let url = self.endpoints.stream_url(source);
        debug!("GET {}", url);

        let response = self
            .stream_client
            .get(&url)
            .query(&[("query", query)])
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| FeedError::Transport(self.describe(&e, &url, false)))?;

        if !response.status().is_success() {
            return Err(FeedError::Transport(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| FeedError::Transport(format!("Stream body failed: {}", e)))
            })
            .boxed())
    }

    async fn fetch_once(&self, source: SourceKind, query: &str) -> Result<Value, FeedError> {
        let url = self.endpoints.fallback_url(source);
        debug!("POST {}", url);

        let response = self
            .fallback_client
            .post(&url)
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(|e| FeedError::Fallback(self.describe(&e, &url, true)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Fallback(format!("{} returned {}: {}", url, status, body)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FeedError::Fallback(format!("Invalid response from {}: {}", url, e)))
    }
}
