//! Experiment execution: the claim loop, per-row hypothesis replay and
//! scoring of the confirmed runs.

pub mod evaluation;
pub mod hypothesis;
pub mod scheduler;
pub mod template;

pub use evaluation::{EvaluationReport, ExperimentEvaluation};
pub use hypothesis::{HypothesisExecutor, RowOutcome};
pub use scheduler::{ExperimentReport, ExperimentScheduler, HypothesisReport};

use crate::config::EngineConfig;
use crate::confirm::WriteConfirmation;
use crate::credentials::CredentialBroker;
use crate::evaluator::EvaluatorRunner;
use crate::providers::ProviderTransport;
use crate::sandbox::SandboxPool;
use crate::storage::Store;
use std::sync::Arc;

impl ExperimentScheduler {
    /// Wire the executor, broker and confirmation policy from config.
    pub fn from_config(
        cfg: &EngineConfig,
        store: Store,
        transport: Arc<dyn ProviderTransport>,
    ) -> Self {
        let broker = CredentialBroker::new(Arc::new(store.clone()), &cfg.credentials.key_prefix);
        let executor = HypothesisExecutor::new(
            store.clone(),
            broker.clone(),
            transport,
            WriteConfirmation::from_config(&cfg.confirmation),
        );
        ExperimentScheduler::new(
            store,
            broker,
            executor,
            cfg.row_grace_period(),
            cfg.poll_interval(),
        )
    }

    /// `from_config` plus evaluators run in `pool`.
    pub fn from_config_with_sandboxes(
        cfg: &EngineConfig,
        store: Store,
        transport: Arc<dyn ProviderTransport>,
        pool: SandboxPool,
    ) -> Self {
        let runner = EvaluatorRunner::new(pool, &cfg.sandbox);
        Self::from_config(cfg, store.clone(), transport)
            .with_evaluation(ExperimentEvaluation::new(store, runner))
    }
}
