//! Sandboxes for running untrusted evaluator code.
//!
//! A `SandboxProvider` creates isolated environments; the `SandboxPool`
//! bounds how many are live at once and reuses one per tenant key.

pub mod local;
mod pool;

pub use local::LocalSandboxProvider;
pub use pool::{PoolStats, SandboxLease, SandboxPool};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("Sandbox creation failed: {0}")]
    Create(String),

    #[error("Sandbox operation {operation} failed: {detail}")]
    Operation { operation: String, detail: String },

    #[error("File not found in sandbox: {path}")]
    FileNotFound { path: String },

    #[error("Sandbox operation {operation} timed out after {timeout:?}")]
    OperationTimeout { operation: String, timeout: Duration },

    #[error("Sandbox pool was shut down while the sandbox was being created")]
    PoolShutDown,
}

impl SandboxError {
    pub(crate) fn operation(operation: &str, detail: impl std::fmt::Display) -> Self {
        SandboxError::Operation {
            operation: operation.to_string(),
            detail: detail.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub exit_code: i32,
}

/// Options passed to `SandboxProvider::create` for every new sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxOptions {
    pub env: BTreeMap<String, String>,
    /// Provider-side lifetime limit, if the provider supports one.
    pub idle_timeout: Option<Duration>,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;

    /// Create or overwrite `path`.
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), SandboxError>;

    async fn run(&self, command: &str) -> Result<CommandOutput, SandboxError>;

    /// `SandboxError::FileNotFound` when `path` does not exist.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError>;

    async fn shutdown(&self) -> Result<(), SandboxError>;
}

#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(
        &self,
        tenant_key: &str,
        options: &SandboxOptions,
    ) -> Result<Arc<dyn Sandbox>, SandboxError>;
}
