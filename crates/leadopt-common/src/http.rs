//! Retry-wrapped request helpers on top of [`SandboxClient`].

use reqwest::{RequestBuilder, Response};
use tracing::debug;

use crate::error::{LeadOptError, Result};
use crate::retry::{retry_async, RetryPolicy};
use crate::sandbox::SandboxClient;

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: SandboxClient,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(client: SandboxClient, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn client(&self) -> &SandboxClient {
        &self.client
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Sends the request produced by `build`, rebuilding it for every attempt.
    /// 5xx and 429 responses count as transient; other error statuses are fatal.
    pub async fn send<F>(&self, label: &str, build: F) -> Result<Response>
    where
        F: Fn(&SandboxClient) -> Result<RequestBuilder>,
    {
        let build = &build;
        let client = &self.client;
        retry_async(&self.retry, label, move || async move {
            let response = build(client)?.send().await?;
            let status = response.status();
            debug!(%label, %status, "HTTP response");
            if status.is_server_error() || status.as_u16() == 429 {
                let body = response.text().await.unwrap_or_default();
                return Err(LeadOptError::unavailable(label, format!("{}: {}", status, truncate(&body, 300))));
            }
            Ok(response.error_for_status()?)
        })
        .await
    }

    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let response = self.send(url, |c| c.get(url)).await?;
        Ok(response.json().await?)
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.send(url, |c| c.get(url)).await?;
        Ok(response.text().await?)
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.send(url, |c| c.get(url)).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
