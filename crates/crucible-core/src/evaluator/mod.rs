//! Code evaluators: user scripts run inside a pooled sandbox.

mod runner;
mod score;

pub use runner::{EvaluatorInvocation, EvaluatorOutcome, EvaluatorRunner};
pub use score::EvaluatorScore;

use crate::errors::EngineErrorKind;
use crate::sandbox::SandboxError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("No sandbox available for tenant {tenant_key}: {source}")]
    Acquire {
        tenant_key: String,
        #[source]
        source: SandboxError,
    },

    #[error("Evaluator step {step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: SandboxError,
    },

    #[error("Score is undefined")]
    ScoreUndefined,

    #[error("Unparseable score: {0}")]
    UnparseableScore(String),
}

impl EvaluatorError {
    pub fn kind(&self) -> EngineErrorKind {
        match self {
            EvaluatorError::Acquire { source, .. } | EvaluatorError::Step { source, .. } => {
                source.into()
            }
            _ => EngineErrorKind::Other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == EngineErrorKind::SandboxOperationTimeout
    }
}
