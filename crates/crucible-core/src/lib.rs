//! Experiment execution engine.
//!
//! Claims queued experiments, replays prompt templates against providers
//! through single-use proxy credentials, confirms that the resulting log rows
//! landed, and runs code evaluators inside a bounded pool of sandboxes.
//!
//! ```text
//! ┌────────────────────┐   claim    ┌─────────────┐
//! │ ExperimentScheduler│───────────▶│    Store    │◀──────────────┐
//! └─────────┬──────────┘            │  (SQLite)   │               │
//!           │ per hypothesis × row  └─────────────┘               │
//!           ▼                               ▲                     │
//! ┌────────────────────┐  proxy key ┌───────┴─────────┐  confirm  │
//! │ HypothesisExecutor │◀───────────│CredentialBroker │           │
//! └─────────┬──────────┘            └─────────────────┘           │
//!           │ POST                                                │
//!           ▼                                                     │
//!    ProviderTransport ──▶ WriteConfirmation (backoff) ───────────┘
//!
//! ExperimentEvaluation ──▶ EvaluatorRunner ──▶ SandboxPool (bounded, per-tenant) ──▶ Sandbox
//! ```

pub mod config;
pub mod confirm;
pub mod credentials;
pub mod engine;
pub mod errors;
pub mod evaluator;
pub mod model;
pub mod providers;
pub mod sandbox;
pub mod shutdown;
pub mod storage;

pub use config::EngineConfig;
pub use errors::EngineErrorKind;
pub use storage::Store;
