use super::evaluation::{EvaluationReport, ExperimentEvaluation};
use super::hypothesis::{proxy_key_label, HypothesisExecutor, RowOutcome};
use crate::credentials::CredentialBroker;
use crate::errors::{classify, EngineErrorKind};
use crate::model::{DatasetRow, Experiment, ExperimentStatus, Hypothesis, HypothesisStatus};
use crate::shutdown::ShutdownSignal;
use crate::storage::Store;
use anyhow::Context;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HypothesisReport {
    pub hypothesis_id: String,
    pub status: HypothesisStatus,
    pub rows_confirmed: usize,
    pub rows_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperimentReport {
    pub experiment_id: String,
    pub status: ExperimentStatus,
    pub hypotheses: Vec<HypothesisReport>,
    /// Set when evaluators ran after the rows finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationReport>,
}

enum Progress {
    Finished,
    Interrupted,
}

/// Single-flight driver: claims one experiment per tick and runs it to a
/// terminal status.
pub struct ExperimentScheduler {
    store: Store,
    broker: CredentialBroker,
    executor: HypothesisExecutor,
    evaluation: Option<ExperimentEvaluation>,
    row_grace_period: Duration,
    poll_interval: Duration,
}

impl ExperimentScheduler {
    pub fn new(
        store: Store,
        broker: CredentialBroker,
        executor: HypothesisExecutor,
        row_grace_period: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            broker,
            executor,
            evaluation: None,
            row_grace_period,
            poll_interval,
        }
    }

    /// Score confirmed runs with the experiment's evaluators once its rows
    /// are done. Canceled experiments are not scored.
    pub fn with_evaluation(mut self, evaluation: ExperimentEvaluation) -> Self {
        self.evaluation = Some(evaluation);
        self
    }

    /// Tick until shutdown. Tick errors are logged, never propagated.
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "scheduler started"
        );
        while !shutdown.is_shutdown() {
            match self.pop_and_run(&shutdown).await {
                Ok(Some(report)) => tracing::info!(
                    experiment_id = %report.experiment_id,
                    status = report.status.as_str(),
                    "experiment finished"
                ),
                Ok(None) => {}
                Err(e) => tracing::error!(
                    kind = %classify(&e),
                    error = %format!("{e:#}"),
                    "scheduler tick failed"
                ),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }
        tracing::info!("scheduler stopped");
    }

    /// Claim the oldest queued experiment and run it. `Ok(None)` when idle.
    pub async fn pop_and_run(
        &self,
        shutdown: &ShutdownSignal,
    ) -> anyhow::Result<Option<ExperimentReport>> {
        let Some(experiment) = self
            .store
            .claim_next_queued_experiment()
            .context("claiming queued experiment")?
        else {
            tracing::trace!(kind = %EngineErrorKind::ClaimEmpty, "no queued experiment");
            return Ok(None);
        };

        tracing::info!(
            experiment_id = %experiment.id,
            organization_id = %experiment.organization_id,
            hypotheses = experiment.hypotheses.len(),
            "experiment claimed"
        );

        let mut shutdown = shutdown.clone();
        match self.run_experiment(&experiment, &mut shutdown).await {
            Ok(mut report) => {
                self.store
                    .finish_experiment(&experiment.id, report.status)
                    .context("finishing experiment")?;
                if report.status != ExperimentStatus::Canceled {
                    report.evaluation = self.evaluate(&experiment, &shutdown).await;
                }
                Ok(Some(report))
            }
            Err(e) => {
                if let Err(finish_err) = self
                    .store
                    .finish_experiment(&experiment.id, ExperimentStatus::Failed)
                {
                    tracing::warn!(
                        experiment_id = %experiment.id,
                        error = %finish_err,
                        "could not mark experiment failed"
                    );
                }
                Err(e.context(format!("running experiment {}", experiment.id)))
            }
        }
    }

    /// Evaluator trouble never changes the experiment's status.
    async fn evaluate(
        &self,
        experiment: &Experiment,
        shutdown: &ShutdownSignal,
    ) -> Option<EvaluationReport> {
        let evaluation = self.evaluation.as_ref()?;
        match evaluation
            .score_experiment(&experiment.id, &experiment.organization_id, shutdown)
            .await
        {
            Ok(report) => {
                if report != EvaluationReport::default() {
                    tracing::info!(
                        experiment_id = %experiment.id,
                        scored = report.scored,
                        skipped = report.skipped,
                        failed = report.failed,
                        interrupted = report.interrupted,
                        "experiment evaluated"
                    );
                }
                Some(report)
            }
            Err(e) => {
                tracing::error!(
                    experiment_id = %experiment.id,
                    kind = %classify(&e),
                    error = %format!("{e:#}"),
                    "experiment evaluation failed"
                );
                None
            }
        }
    }

    async fn run_experiment(
        &self,
        experiment: &Experiment,
        shutdown: &mut ShutdownSignal,
    ) -> anyhow::Result<ExperimentReport> {
        let rows = self
            .store
            .load_dataset_rows(&experiment.dataset_id)
            .context("loading dataset rows")?;

        let mut reports = Vec::with_capacity(experiment.hypotheses.len());
        let mut interrupted = false;
        let mut any_failed = false;

        for hypothesis in &experiment.hypotheses {
            let mut report = HypothesisReport {
                hypothesis_id: hypothesis.id.clone(),
                status: HypothesisStatus::Canceled,
                rows_confirmed: 0,
                rows_failed: 0,
            };

            if !interrupted && !shutdown.is_shutdown() {
                let progress = self
                    .run_hypothesis_rows(experiment, hypothesis, &rows, shutdown, &mut report)
                    .await;
                report.status = match progress {
                    Ok(Progress::Finished) => HypothesisStatus::Completed,
                    Ok(Progress::Interrupted) => HypothesisStatus::Canceled,
                    Err(e) => {
                        tracing::error!(
                            experiment_id = %experiment.id,
                            hypothesis_id = %hypothesis.id,
                            kind = %classify(&e),
                            error = %format!("{e:#}"),
                            "hypothesis failed"
                        );
                        any_failed = true;
                        HypothesisStatus::Failed
                    }
                };
            }
            interrupted |= report.status == HypothesisStatus::Canceled;

            self.store
                .update_hypothesis_status(&hypothesis.id, report.status)
                .context("updating hypothesis status")?;
            tracing::info!(
                experiment_id = %experiment.id,
                hypothesis_id = %hypothesis.id,
                status = report.status.as_str(),
                rows_confirmed = report.rows_confirmed,
                rows_failed = report.rows_failed,
                "hypothesis finished"
            );
            reports.push(report);
        }

        let status = if interrupted {
            ExperimentStatus::Canceled
        } else if any_failed {
            ExperimentStatus::Failed
        } else {
            ExperimentStatus::Completed
        };

        Ok(ExperimentReport {
            experiment_id: experiment.id.clone(),
            status,
            hypotheses: reports,
            evaluation: None,
        })
    }

    /// All rows for one hypothesis under a single proxy credential.
    async fn run_hypothesis_rows(
        &self,
        experiment: &Experiment,
        hypothesis: &Hypothesis,
        rows: &[DatasetRow],
        shutdown: &mut ShutdownSignal,
        report: &mut HypothesisReport,
    ) -> anyhow::Result<Progress> {
        let template = self
            .store
            .load_prompt_template(&hypothesis.prompt_version_id)
            .with_context(|| format!("loading prompt version {}", hypothesis.prompt_version_id))?;
        let credential = self
            .broker
            .issue_proxy(
                &experiment.organization_id,
                &hypothesis.provider_key_id,
                &proxy_key_label(hypothesis),
            )
            .context("issuing proxy credential")?;

        credential
            .with_credential(|proxy_key| async move {
                for (index, row) in rows.iter().enumerate() {
                    if shutdown.is_shutdown() {
                        return Ok(Progress::Interrupted);
                    }

                    let outcome = tokio::select! {
                        outcome = self.executor.run_with_proxy_key(
                            experiment, hypothesis, &template, row, &proxy_key,
                        ) => outcome,
                        _ = shutdown.cancelled() => return Ok(Progress::Interrupted),
                    };
                    record_row(experiment, hypothesis, row, outcome, report);

                    let more_rows = index + 1 < rows.len();
                    if more_rows && !self.grace_period(shutdown).await {
                        return Ok(Progress::Interrupted);
                    }
                }
                Ok::<_, anyhow::Error>(Progress::Finished)
            })
            .await
    }

    /// Sleep the grace period. `false` if shutdown interrupted it.
    async fn grace_period(&self, shutdown: &mut ShutdownSignal) -> bool {
        if self.row_grace_period.is_zero() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.row_grace_period) => true,
            _ = shutdown.cancelled() => false,
        }
    }
}

fn record_row(
    experiment: &Experiment,
    hypothesis: &Hypothesis,
    row: &DatasetRow,
    outcome: Result<RowOutcome, crate::storage::StoreError>,
    report: &mut HypothesisReport,
) {
    match outcome {
        Ok(RowOutcome {
            confirmed: true, ..
        }) => report.rows_confirmed += 1,
        Ok(_) => report.rows_failed += 1,
        Err(e) => {
            tracing::warn!(
                experiment_id = %experiment.id,
                hypothesis_id = %hypothesis.id,
                row_id = %row.id,
                error = %e,
                "row failed"
            );
            report.rows_failed += 1;
        }
    }
}
