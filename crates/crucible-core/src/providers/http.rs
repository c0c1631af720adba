use super::{ProviderError, ProviderRequest, ProviderResponse, ProviderTransport};
use async_trait::async_trait;
use std::time::Duration;

/// reqwest-backed transport posting to `{base_url}{request.path}`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn post(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = self.url_for(&request.path);
        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&request.bearer)
            .json(&request.body);
        for (name, value) in request.tracking_headers() {
            builder = builder.header(name, value);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();

        tracing::debug!(url = %url, request_id = %request.request_id, status, "provider call returned");
        Ok(ProviderResponse { status, body })
    }
}
