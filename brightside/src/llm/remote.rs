use anyhow::{Context, Result};
use std::time::Duration;

use super::{CompletionProvider, CompletionRequest, UpstreamResponse};

/// Remote LLM provider using OpenAI-compatible HTTP API
pub struct RemoteLlmProvider {
    base_url: String,
    timeout: Option<Duration>,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
            client: reqwest::Client::new(),
        }
    }

    /// Bound each upstream call. Without this the call runs to completion or failure.
    pub fn with_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout = timeout_secs.map(Duration::from_secs);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl CompletionProvider for RemoteLlmProvider {
    async fn send_completion(
        &self,
        api_key: &str,
        request: &CompletionRequest,
    ) -> Result<UpstreamResponse> {
        let exchange = async {
            let response = self
                .client
                .post(&self.base_url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(request)
                .send()
                .await
                .context("LLM HTTP request failed")?;

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .context("Failed to read LLM response body")?;

            Ok::<_, anyhow::Error>(UpstreamResponse { status, body })
        };

        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange)
                .await
                .context("LLM request timed out")?,
            None => exchange.await,
        }
    }
}
