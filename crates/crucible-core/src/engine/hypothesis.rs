use super::template::render_request_body;
use crate::confirm::WriteConfirmation;
use crate::credentials::CredentialBroker;
use crate::errors::EngineErrorKind;
use crate::model::{DatasetRow, Experiment, Hypothesis};
use crate::providers::{ProviderError, ProviderRequest, ProviderTransport};
use crate::storage::{Store, StoreError};
use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;

/// Result of replaying one dataset row against one hypothesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowOutcome {
    pub request_id: String,
    /// `None` when the call never produced an HTTP response.
    pub provider_status: Option<u16>,
    /// Whether the run linkage was confirmed before the deadline.
    pub confirmed: bool,
}

/// Replays rows against a hypothesis and links each call to its log row.
#[derive(Clone)]
pub struct HypothesisExecutor {
    store: Store,
    broker: CredentialBroker,
    transport: Arc<dyn ProviderTransport>,
    confirmation: WriteConfirmation,
}

pub(crate) fn proxy_key_label(hypothesis: &Hypothesis) -> String {
    format!("experiment-hypothesis-{}", hypothesis.id)
}

impl HypothesisExecutor {
    pub fn new(
        store: Store,
        broker: CredentialBroker,
        transport: Arc<dyn ProviderTransport>,
        confirmation: WriteConfirmation,
    ) -> Self {
        Self {
            store,
            broker,
            transport,
            confirmation,
        }
    }

    /// Run one row under a proxy credential issued for this call alone.
    pub async fn run_hypothesis(
        &self,
        experiment: &Experiment,
        hypothesis: &Hypothesis,
        row: &DatasetRow,
    ) -> anyhow::Result<RowOutcome> {
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
                self.run_with_proxy_key(experiment, hypothesis, &template, row, &proxy_key)
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await
    }

    /// Fire the provider call, then confirm the run linkage.
    ///
    /// Provider failures are logged and do not skip confirmation. A
    /// confirmation timeout is recorded as a failed run. Only datastore
    /// errors while recording that failure are returned.
    pub async fn run_with_proxy_key(
        &self,
        experiment: &Experiment,
        hypothesis: &Hypothesis,
        template: &serde_json::Value,
        row: &DatasetRow,
        proxy_key: &str,
    ) -> Result<RowOutcome, StoreError> {
        let request = ProviderRequest {
            path: row.input_record.request_path.clone(),
            bearer: proxy_key.to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
            experiment_id: experiment.id.clone(),
            hypothesis_id: hypothesis.id.clone(),
            row_id: row.id.clone(),
            body: render_request_body(template, &row.input_record.inputs, &hypothesis.model),
        };
        let request_id = request.request_id.as_str();

        let (fired, confirmed) = self
            .confirmation
            .fire_and_confirm(
                self.transport.post(&request),
                || {
                    std::future::ready(self.confirm_run(
                        &experiment.id,
                        &hypothesis.id,
                        &row.id,
                        request_id,
                    ))
                },
                "Failed to confirm hypothesis run",
            )
            .await;

        let provider_status = match fired {
            Ok(resp) if resp.is_success() => Some(resp.status),
            Ok(resp) => {
                let err = ProviderError::Status {
                    status: resp.status,
                    body: resp.body,
                };
                tracing::warn!(
                    experiment_id = %experiment.id,
                    hypothesis_id = %hypothesis.id,
                    row_id = %row.id,
                    request_id,
                    kind = %EngineErrorKind::from(&err),
                    error = %err,
                    "provider call failed"
                );
                Some(resp.status)
            }
            Err(err) => {
                tracing::warn!(
                    experiment_id = %experiment.id,
                    hypothesis_id = %hypothesis.id,
                    row_id = %row.id,
                    request_id,
                    kind = %EngineErrorKind::from(&err),
                    error = %err,
                    "provider call failed"
                );
                None
            }
        };

        let confirmed = match confirmed {
            Ok(()) => true,
            Err(err) => {
                let kind = EngineErrorKind::from(&err);
                tracing::warn!(
                    experiment_id = %experiment.id,
                    hypothesis_id = %hypothesis.id,
                    row_id = %row.id,
                    request_id,
                    kind = %kind,
                    error = %err,
                    "hypothesis run not confirmed"
                );
                self.store.record_run_failure(
                    &experiment.id,
                    &hypothesis.id,
                    &row.id,
                    request_id,
                    kind.label(),
                )?;
                false
            }
        };

        Ok(RowOutcome {
            request_id: request.request_id.clone(),
            provider_status,
            confirmed,
        })
    }

    fn confirm_run(
        &self,
        experiment_id: &str,
        hypothesis_id: &str,
        row_id: &str,
        request_id: &str,
    ) -> anyhow::Result<()> {
        if !self.store.request_log_exists(request_id)? {
            anyhow::bail!("request log {request_id} not yet written");
        }
        self.store
            .insert_hypothesis_run(experiment_id, hypothesis_id, row_id, request_id)?;
        Ok(())
    }
}
