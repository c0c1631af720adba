mod dispatch;
pub mod enqueue;
pub mod evaluate;
pub mod tick;
pub mod worker;

pub use dispatch::dispatch;

use anyhow::Context;
use crucible_core::providers::HttpTransport;
use crucible_core::sandbox::{LocalSandboxProvider, SandboxOptions, SandboxPool};
use crucible_core::{EngineConfig, Store};
use std::sync::Arc;

/// Local sandboxes run commands from their own directory, so the evaluator
/// workspace has to be relative to it.
const LOCAL_WORKSPACE_ROOT: &str = "workspace";

pub(crate) fn open_store(cfg: &EngineConfig) -> anyhow::Result<Store> {
    Store::open(&cfg.database_path)
        .with_context(|| format!("opening store at {}", cfg.database_path.display()))
}

pub(crate) fn http_transport(cfg: &EngineConfig) -> anyhow::Result<Arc<HttpTransport>> {
    let transport = HttpTransport::new(cfg.provider_base_url.clone())
        .with_context(|| format!("building provider client for {}", cfg.provider_base_url))?;
    Ok(Arc::new(transport))
}

/// Pool of local process sandboxes; points `cfg`'s evaluator workspace at
/// a path inside each sandbox.
pub(crate) fn local_sandboxes(cfg: &mut EngineConfig) -> SandboxPool {
    cfg.sandbox.workspace_root = LOCAL_WORKSPACE_ROOT.to_string();
    SandboxPool::new(
        Arc::new(LocalSandboxProvider::new()),
        cfg.sandbox.concurrency,
        SandboxOptions::default(),
    )
}
