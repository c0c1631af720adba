//! Outbound provider calls.
//!
//! Requests go to the provider proxy, which logs them under the request id we
//! attach. Bodies are opaque JSON; no retries happen at this layer.

mod http;

pub use http::HttpTransport;

use async_trait::async_trait;
use thiserror::Error;

pub const REQUEST_ID_HEADER: &str = "Crucible-Request-Id";
pub const EXPERIMENT_ID_HEADER: &str = "Crucible-Experiment-Id";
pub const HYPOTHESIS_ID_HEADER: &str = "Crucible-Hypothesis-Id";
pub const ROW_ID_HEADER: &str = "Crucible-Row-Id";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provider transport error: {0}")]
    Transport(String),
}

#[derive(Clone, PartialEq)]
pub struct ProviderRequest {
    /// Path appended to the transport's base URL, e.g. `/v1/chat/completions`.
    pub path: String,
    pub bearer: String,
    pub request_id: String,
    pub experiment_id: String,
    pub hypothesis_id: String,
    pub row_id: String,
    pub body: serde_json::Value,
}

impl ProviderRequest {
    /// Headers in wire order, excluding the bearer token.
    pub fn tracking_headers(&self) -> [(&'static str, &str); 4] {
        [
            (REQUEST_ID_HEADER, self.request_id.as_str()),
            (EXPERIMENT_ID_HEADER, self.experiment_id.as_str()),
            (HYPOTHESIS_ID_HEADER, self.hypothesis_id.as_str()),
            (ROW_ID_HEADER, self.row_id.as_str()),
        ]
    }
}

impl std::fmt::Debug for ProviderRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRequest")
            .field("path", &self.path)
            .field("request_id", &self.request_id)
            .field("experiment_id", &self.experiment_id)
            .field("hypothesis_id", &self.hypothesis_id)
            .field("row_id", &self.row_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: String,
}

impl ProviderResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Any HTTP status is `Ok`; only transport failures are `Err`.
    async fn post(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}
