//! Store: SQLite-backed datastore for the experiment engine.
//!
//! Provides:
//! - Atomic claim of the oldest queued experiment
//! - Idempotent hypothesis-run upserts keyed on (hypothesis, row)
//! - Credential record insert / idempotent delete
//! - Evaluator attachment and first-write-wins scores

use super::store_internal::{claim, credentials, runs, scores, seed};
use crate::evaluator::EvaluatorScore;
use crate::model::{
    DatasetRow, Experiment, ExperimentEvaluator, ExperimentStatus, HypothesisRun,
    HypothesisStatus, NewExperiment, RequestBodies,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid stored data in {entity}: {detail}")]
    Corrupt { entity: &'static str, detail: String },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Parameters for `Store::insert_credential_record`. Only the hash of the
/// secret is ever persisted.
#[derive(Debug, Clone)]
pub struct NewCredentialRecord<'a> {
    pub kind: &'a str,
    pub secret_hash: &'a str,
    pub owner_id: &'a str,
    pub organization_id: &'a str,
    pub provider_key_id: Option<&'a str>,
    pub label: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderKeyRow {
    pub id: String,
    pub organization_id: String,
    pub name: String,
}

#[derive(Clone)]
pub struct Store {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open a file-backed store.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_connection(conn: &Connection) -> Result<(), StoreError> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        // no-op for in-memory
        let _ = conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()));
        conn.busy_timeout(std::time::Duration::from_millis(5000))?;
        conn.execute_batch(super::ENGINE_SCHEMA)?;
        Ok(())
    }

    /// Atomically move the oldest queued experiment to `running`.
    ///
    /// Returns `None` when nothing is queued. Concurrent callers on separate
    /// connections never claim the same experiment.
    pub fn claim_next_queued_experiment(&self) -> Result<Option<Experiment>, StoreError> {
        let conn = self.conn.lock().unwrap();
        claim::claim_next_queued_in_txn_impl(&conn)
    }

    pub fn load_dataset_rows(&self, dataset_id: &str) -> Result<Vec<DatasetRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        claim::load_dataset_rows_impl(&conn, dataset_id)
    }

    pub fn load_hypotheses(
        &self,
        experiment_id: &str,
    ) -> Result<Vec<crate::model::Hypothesis>, StoreError> {
        let conn = self.conn.lock().unwrap();
        claim::load_hypotheses_impl(&conn, experiment_id)
    }

    pub fn load_prompt_template(
        &self,
        prompt_version_id: &str,
    ) -> Result<serde_json::Value, StoreError> {
        let conn = self.conn.lock().unwrap();
        claim::load_prompt_template_impl(&conn, prompt_version_id)
    }

    /// Upsert on (hypothesis, row). Re-running a pair overwrites the linkage.
    pub fn upsert_hypothesis_run(&self, run: &HypothesisRun) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        runs::upsert_hypothesis_run_impl(&conn, run)
    }

    /// Convenience wrapper matching the confirmed-linkage write.
    pub fn insert_hypothesis_run(
        &self,
        experiment_id: &str,
        hypothesis_id: &str,
        row_id: &str,
        request_id: &str,
    ) -> Result<(), StoreError> {
        self.upsert_hypothesis_run(&HypothesisRun {
            experiment_id: experiment_id.to_string(),
            hypothesis_id: hypothesis_id.to_string(),
            row_id: row_id.to_string(),
            result_request_id: request_id.to_string(),
            status: crate::model::RunStatus::Confirmed,
            error: None,
        })
    }

    /// Same upsert as a confirmed run, but `failed` with an error label.
    pub fn record_run_failure(
        &self,
        experiment_id: &str,
        hypothesis_id: &str,
        row_id: &str,
        request_id: &str,
        error: &str,
    ) -> Result<(), StoreError> {
        self.upsert_hypothesis_run(&HypothesisRun {
            experiment_id: experiment_id.to_string(),
            hypothesis_id: hypothesis_id.to_string(),
            row_id: row_id.to_string(),
            result_request_id: request_id.to_string(),
            status: crate::model::RunStatus::Failed,
            error: Some(error.to_string()),
        })
    }

    pub fn list_hypothesis_runs(
        &self,
        experiment_id: &str,
    ) -> Result<Vec<HypothesisRun>, StoreError> {
        let conn = self.conn.lock().unwrap();
        runs::list_hypothesis_runs_impl(&conn, experiment_id)
    }

    pub fn request_log_exists(&self, request_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        runs::request_log_exists_impl(&conn, request_id)
    }

    /// Written by the ingestion path once a proxied call has been logged.
    pub fn record_request_log(
        &self,
        request_id: &str,
        organization_id: &str,
        status_code: Option<u16>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        runs::record_request_log_impl(&conn, request_id, organization_id, status_code, None)
    }

    /// Same as `record_request_log`, keeping the call's bodies for evaluators.
    pub fn record_request_log_with_bodies(
        &self,
        request_id: &str,
        organization_id: &str,
        status_code: Option<u16>,
        bodies: &RequestBodies,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        runs::record_request_log_impl(&conn, request_id, organization_id, status_code, Some(bodies))
    }

    /// `None` when no log row exists for `request_id`.
    pub fn request_log_bodies(&self, request_id: &str) -> Result<Option<RequestBodies>, StoreError> {
        let conn = self.conn.lock().unwrap();
        runs::request_log_bodies_impl(&conn, request_id)
    }

    pub fn update_hypothesis_status(
        &self,
        hypothesis_id: &str,
        status: HypothesisStatus,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        runs::update_hypothesis_status_impl(&conn, hypothesis_id, status)
    }

    pub fn hypothesis_status(
        &self,
        hypothesis_id: &str,
    ) -> Result<Option<HypothesisStatus>, StoreError> {
        let conn = self.conn.lock().unwrap();
        runs::hypothesis_status_impl(&conn, hypothesis_id)
    }

    pub fn finish_experiment(
        &self,
        experiment_id: &str,
        status: ExperimentStatus,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        runs::finish_experiment_impl(&conn, experiment_id, status)
    }

    pub fn experiment_status(
        &self,
        experiment_id: &str,
    ) -> Result<Option<ExperimentStatus>, StoreError> {
        let conn = self.conn.lock().unwrap();
        runs::experiment_status_impl(&conn, experiment_id)
    }

    pub fn organization_owner(&self, organization_id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        credentials::organization_owner_impl(&conn, organization_id)
    }

    pub fn provider_key(
        &self,
        organization_id: &str,
        provider_key_id: &str,
    ) -> Result<Option<ProviderKeyRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        credentials::provider_key_impl(&conn, organization_id, provider_key_id)
    }

    /// Returns the generated record id.
    pub fn insert_credential_record(
        &self,
        record: &NewCredentialRecord<'_>,
    ) -> Result<String, StoreError> {
        let conn = self.conn.lock().unwrap();
        credentials::insert_credential_record_impl(&conn, record)
    }

    /// Idempotent: returns `false` when no row matched.
    pub fn delete_credential_record(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        credentials::delete_credential_record_impl(&conn, id)
    }

    pub fn count_credential_records(&self) -> Result<u32, StoreError> {
        let conn = self.conn.lock().unwrap();
        credentials::count_credential_records_impl(&conn)
    }

    pub fn upsert_organization(&self, id: &str, owner_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        seed::upsert_organization_impl(&conn, id, owner_id)
    }

    pub fn upsert_provider_key(
        &self,
        id: &str,
        organization_id: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        seed::upsert_provider_key_impl(&conn, id, organization_id, name)
    }

    pub fn upsert_prompt_version(
        &self,
        id: &str,
        organization_id: &str,
        template: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        seed::upsert_prompt_version_impl(&conn, id, organization_id, template)
    }

    /// Insert an experiment with its rows and hypotheses as `queued`.
    /// Returns the experiment id.
    pub fn enqueue_experiment(&self, new: &NewExperiment) -> Result<String, StoreError> {
        let conn = self.conn.lock().unwrap();
        seed::enqueue_experiment_in_txn_impl(&conn, new)
    }

    pub fn list_experiment_evaluators(
        &self,
        experiment_id: &str,
    ) -> Result<Vec<ExperimentEvaluator>, StoreError> {
        let conn = self.conn.lock().unwrap();
        scores::list_experiment_evaluators_impl(&conn, experiment_id)
    }

    pub fn score(
        &self,
        request_id: &str,
        score_name: &str,
    ) -> Result<Option<EvaluatorScore>, StoreError> {
        let conn = self.conn.lock().unwrap();
        scores::score_impl(&conn, request_id, score_name)
    }

    pub fn score_exists(&self, request_id: &str, score_name: &str) -> Result<bool, StoreError> {
        Ok(self.score(request_id, score_name)?.is_some())
    }

    /// Keyed on (request, score name); an existing score is kept and `false`
    /// returned.
    pub fn record_score(
        &self,
        request_id: &str,
        score_name: &str,
        evaluator_id: &str,
        score: &EvaluatorScore,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        scores::record_score_impl(&conn, request_id, score_name, evaluator_id, score)
    }
}
