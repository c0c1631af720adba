use crate::evaluator::{EvaluatorError, EvaluatorInvocation, EvaluatorRunner, EvaluatorScore};
use crate::model::{ExperimentEvaluator, HypothesisRun, RunStatus};
use crate::shutdown::ShutdownSignal;
use crate::storage::Store;
use anyhow::Context;
use serde::Serialize;

/// Per-experiment tally of evaluator work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationReport {
    pub scored: usize,
    /// Run/evaluator pairs that already had a score.
    pub skipped: usize,
    pub failed: usize,
    pub interrupted: bool,
}

/// Scores an experiment's confirmed runs with its attached code evaluators.
///
/// Sandboxes are pooled per organization. A run keeps at most one score per
/// evaluator score name, so re-running an experiment's evaluation only fills
/// the gaps.
#[derive(Clone)]
pub struct ExperimentEvaluation {
    store: Store,
    runner: EvaluatorRunner,
}

impl ExperimentEvaluation {
    pub fn new(store: Store, runner: EvaluatorRunner) -> Self {
        Self { store, runner }
    }

    pub fn runner(&self) -> &EvaluatorRunner {
        &self.runner
    }

    /// Evaluator failures are counted and logged per run; only datastore
    /// errors are returned.
    pub async fn score_experiment(
        &self,
        experiment_id: &str,
        organization_id: &str,
        shutdown: &ShutdownSignal,
    ) -> anyhow::Result<EvaluationReport> {
        let mut report = EvaluationReport::default();
        let evaluators = self
            .store
            .list_experiment_evaluators(experiment_id)
            .context("loading experiment evaluators")?;
        if evaluators.is_empty() {
            return Ok(report);
        }

        let runs = self
            .store
            .list_hypothesis_runs(experiment_id)
            .context("loading hypothesis runs")?;
        let mut shutdown = shutdown.clone();

        for run in runs.iter().filter(|r| r.status == RunStatus::Confirmed) {
            let bodies = self
                .store
                .request_log_bodies(&run.result_request_id)
                .context("loading request log bodies")?
                .unwrap_or_default();

            for evaluator in &evaluators {
                if self
                    .store
                    .score_exists(&run.result_request_id, &evaluator.score_name)
                    .context("checking existing score")?
                {
                    report.skipped += 1;
                    continue;
                }
                if shutdown.is_shutdown() {
                    report.interrupted = true;
                    return Ok(report);
                }

                let invocation = EvaluatorInvocation::new(
                    evaluator.code.clone(),
                    bodies.request_body.clone(),
                    bodies.response_body.clone(),
                    organization_id,
                );
                let scored = tokio::select! {
                    scored = self.score_run(&invocation) => scored,
                    _ = shutdown.cancelled() => {
                        report.interrupted = true;
                        return Ok(report);
                    }
                };

                match scored {
                    Ok(score) => {
                        self.store
                            .record_score(
                                &run.result_request_id,
                                &evaluator.score_name,
                                &evaluator.id,
                                &score,
                            )
                            .context("recording score")?;
                        tracing::info!(
                            experiment_id,
                            request_id = %run.result_request_id,
                            score_name = %evaluator.score_name,
                            score = %score,
                            "run scored"
                        );
                        report.scored += 1;
                    }
                    Err(e) => {
                        log_failure(run, evaluator, &e);
                        report.failed += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    async fn score_run(
        &self,
        invocation: &EvaluatorInvocation,
    ) -> Result<EvaluatorScore, EvaluatorError> {
        self.runner.run(invocation).await?.score()
    }
}

fn log_failure(run: &HypothesisRun, evaluator: &ExperimentEvaluator, err: &EvaluatorError) {
    tracing::warn!(
        experiment_id = %run.experiment_id,
        request_id = %run.result_request_id,
        evaluator_id = %evaluator.id,
        score_name = %evaluator.score_name,
        kind = %err.kind(),
        error = %err,
        "evaluator did not produce a score"
    );
}
