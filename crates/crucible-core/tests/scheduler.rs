//! End-to-end scheduler ticks against an in-memory store, a fake proxy
//! that writes the request log the way the ingestion path would, and a fake
//! sandbox whose evaluator "runs" by echoing its code as the score.

use async_trait::async_trait;
use crucible_core::engine::{EvaluationReport, ExperimentEvaluation, ExperimentScheduler};
use crucible_core::evaluator::{EvaluatorRunner, EvaluatorScore};
use crucible_core::model::{
    ExperimentStatus, HypothesisStatus, InputRecord, NewEvaluator, NewExperiment, NewHypothesis,
    RequestBodies, RunStatus,
};
use crucible_core::providers::{
    ProviderError, ProviderRequest, ProviderResponse, ProviderTransport,
};
use crucible_core::sandbox::{
    CommandOutput, Sandbox, SandboxError, SandboxOptions, SandboxPool, SandboxProvider,
};
use crucible_core::shutdown::{self, ShutdownSignal};
use crucible_core::{EngineConfig, Store};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RESPONSE_BODY: &str = r#"{"choices":[{"message":{"content":"ok"}}]}"#;

struct FakeProxy {
    store: Store,
    status: u16,
    ingest: bool,
    calls: Mutex<Vec<ProviderRequest>>,
}

#[async_trait]
impl ProviderTransport for FakeProxy {
    async fn post(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.lock().unwrap().push(request.clone());
        if self.ingest {
            self.store
                .record_request_log_with_bodies(
                    &request.request_id,
                    "org-1",
                    Some(self.status),
                    &RequestBodies {
                        request_body: request.body.to_string(),
                        response_body: RESPONSE_BODY.into(),
                    },
                )
                .unwrap();
        }
        Ok(ProviderResponse {
            status: self.status,
            body: RESPONSE_BODY.into(),
        })
    }
}

fn seeded_store() -> Store {
    let store = Store::memory().unwrap();
    store.upsert_organization("org-1", "user-1").unwrap();
    store.upsert_provider_key("pk-1", "org-1", "openai").unwrap();
    store
        .upsert_prompt_version(
            "pv-1",
            "org-1",
            &serde_json::json!({
                "model": "ignored",
                "messages": [{"role": "user", "content": "Summarize <prompt-input key=\"topic\" />"}]
            }),
        )
        .unwrap();
    store
}

fn enqueue(store: &Store, id: &str, provider_keys: &[&str], topics: &[&str]) {
    enqueue_with_evaluators(store, id, provider_keys, topics, &[]);
}

/// `evaluators` are (name, code) pairs.
fn enqueue_with_evaluators(
    store: &Store,
    id: &str,
    provider_keys: &[&str],
    topics: &[&str],
    evaluators: &[(&str, &str)],
) {
    store
        .enqueue_experiment(&NewExperiment {
            id: Some(id.into()),
            organization_id: "org-1".into(),
            dataset_id: None,
            rows: topics
                .iter()
                .map(|t| InputRecord {
                    request_path: "/v1/chat/completions".into(),
                    inputs: BTreeMap::from([("topic".to_string(), t.to_string())]),
                })
                .collect(),
            hypotheses: provider_keys
                .iter()
                .enumerate()
                .map(|(i, pk)| NewHypothesis {
                    prompt_version_id: "pv-1".into(),
                    model: format!("model-{i}"),
                    provider_key_id: pk.to_string(),
                })
                .collect(),
            evaluators: evaluators
                .iter()
                .map(|(name, code)| NewEvaluator {
                    id: None,
                    name: name.to_string(),
                    code: code.to_string(),
                })
                .collect(),
        })
        .unwrap();
}

/// Sandbox whose evaluator writes its own code as the output file; empty
/// code writes nothing.
struct EchoSandbox {
    files: Mutex<HashMap<String, Vec<u8>>>,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Sandbox for EchoSandbox {
    fn id(&self) -> &str {
        "echo"
    }
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), SandboxError> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_vec());
        Ok(())
    }
    async fn run(&self, command: &str) -> Result<CommandOutput, SandboxError> {
        if command.contains("evaluator.py") {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
        Ok(CommandOutput {
            output: String::new(),
            exit_code: 0,
        })
    }
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        let workspace = path.trim_end_matches("output.txt");
        let files = self.files.lock().unwrap();
        match files.get(&format!("{workspace}evaluator.py")) {
            Some(code) if !code.is_empty() => Ok(code.clone()),
            _ => Err(SandboxError::FileNotFound { path: path.into() }),
        }
    }
    async fn shutdown(&self) -> Result<(), SandboxError> {
        Ok(())
    }
}

#[derive(Default)]
struct EchoProvider {
    runs: Arc<AtomicUsize>,
    tenants: Mutex<Vec<String>>,
    last: Mutex<Option<Arc<EchoSandbox>>>,
}

#[async_trait]
impl SandboxProvider for EchoProvider {
    async fn create(
        &self,
        tenant_key: &str,
        _: &SandboxOptions,
    ) -> Result<Arc<dyn Sandbox>, SandboxError> {
        self.tenants.lock().unwrap().push(tenant_key.to_string());
        let sandbox = Arc::new(EchoSandbox {
            files: Mutex::new(HashMap::new()),
            runs: self.runs.clone(),
        });
        *self.last.lock().unwrap() = Some(sandbox.clone());
        Ok(sandbox)
    }
}

fn evaluation(store: &Store) -> (ExperimentEvaluation, Arc<EchoProvider>) {
    let provider = Arc::new(EchoProvider::default());
    let pool = SandboxPool::new(provider.clone(), 1, SandboxOptions::default());
    let runner = EvaluatorRunner::new(pool, &EngineConfig::default().sandbox);
    (ExperimentEvaluation::new(store.clone(), runner), provider)
}

fn scheduler(store: &Store, status: u16, ingest: bool) -> (ExperimentScheduler, Arc<FakeProxy>) {
    let proxy = Arc::new(FakeProxy {
        store: store.clone(),
        status,
        ingest,
        calls: Mutex::new(Vec::new()),
    });
    let mut cfg = EngineConfig::default();
    cfg.confirmation.max_wait_ms = 30_000;
    let scheduler = ExperimentScheduler::from_config(&cfg, store.clone(), proxy.clone());
    (scheduler, proxy)
}

#[tokio::test(start_paused = true)]
async fn idle_tick_returns_none() {
    let store = seeded_store();
    let (scheduler, proxy) = scheduler(&store, 200, true);
    assert!(scheduler
        .pop_and_run(&ShutdownSignal::never())
        .await
        .unwrap()
        .is_none());
    assert!(proxy.calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn runs_every_hypothesis_row_pair_in_order() {
    let store = seeded_store();
    enqueue(&store, "exp-1", &["pk-1", "pk-1"], &["rust", "sqlite"]);
    let (scheduler, proxy) = scheduler(&store, 200, true);
    let started = tokio::time::Instant::now();

    let report = scheduler
        .pop_and_run(&ShutdownSignal::never())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.status, ExperimentStatus::Completed);
    assert!(report
        .hypotheses
        .iter()
        .all(|h| h.status == HypothesisStatus::Completed && h.rows_confirmed == 2));
    assert_eq!(
        store.experiment_status("exp-1").unwrap(),
        Some(ExperimentStatus::Completed)
    );

    let calls = proxy.calls.lock().unwrap();
    assert_eq!(calls.len(), 4);
    let models: Vec<&str> = calls.iter().map(|c| c.body["model"].as_str().unwrap()).collect();
    assert_eq!(models, vec!["model-0", "model-0", "model-1", "model-1"]);
    assert_eq!(
        calls[1].body["messages"][0]["content"],
        "Summarize sqlite"
    );
    // one proxy key per hypothesis, shared across its rows
    assert_eq!(calls[0].bearer, calls[1].bearer);
    assert_ne!(calls[1].bearer, calls[2].bearer);
    assert!(calls[0].bearer.starts_with("sk-crucible-proxy-"));
    drop(calls);

    let runs = store.list_hypothesis_runs("exp-1").unwrap();
    assert_eq!(runs.len(), 4);
    assert!(runs.iter().all(|r| r.status == RunStatus::Confirmed));
    assert_eq!(store.count_credential_records().unwrap(), 0);

    assert_eq!(report.evaluation, None);

    // confirmations land on the first check; one 10s grace between the two rows of each hypothesis
    assert_eq!(started.elapsed(), Duration::from_secs(2 * 10));
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_rows_are_recorded_but_do_not_fail_the_hypothesis() {
    let store = seeded_store();
    enqueue(&store, "exp-1", &["pk-1"], &["rust"]);
    let (scheduler, _) = scheduler(&store, 500, false);

    let report = scheduler
        .pop_and_run(&ShutdownSignal::never())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.status, ExperimentStatus::Completed);
    assert_eq!(report.hypotheses[0].status, HypothesisStatus::Completed);
    assert_eq!(report.hypotheses[0].rows_failed, 1);

    let runs = store.list_hypothesis_runs("exp-1").unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].error.as_deref(), Some("write_confirmation_timeout"));
}

#[tokio::test(start_paused = true)]
async fn credential_failure_fails_only_that_hypothesis() {
    let store = seeded_store();
    enqueue(&store, "exp-1", &["pk-missing", "pk-1"], &["rust"]);
    let (scheduler, proxy) = scheduler(&store, 200, true);

    let report = scheduler
        .pop_and_run(&ShutdownSignal::never())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.status, ExperimentStatus::Failed);
    assert_eq!(report.hypotheses[0].status, HypothesisStatus::Failed);
    assert_eq!(report.hypotheses[1].status, HypothesisStatus::Completed);
    assert_eq!(proxy.calls.lock().unwrap().len(), 1);
    assert_eq!(
        store.experiment_status("exp-1").unwrap(),
        Some(ExperimentStatus::Failed)
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_grace_period_cancels_the_experiment() {
    let store = seeded_store();
    enqueue(&store, "exp-1", &["pk-1", "pk-1"], &["a", "b", "c"]);
    let (scheduler, proxy) = scheduler(&store, 200, true);
    let (trigger, signal) = shutdown::channel();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.trigger();
    });

    let report = scheduler.pop_and_run(&signal).await.unwrap().unwrap();

    assert_eq!(report.status, ExperimentStatus::Canceled);
    assert!(report
        .hypotheses
        .iter()
        .all(|h| h.status == HypothesisStatus::Canceled));
    assert_eq!(proxy.calls.lock().unwrap().len(), 1);
    assert_eq!(
        store.experiment_status("exp-1").unwrap(),
        Some(ExperimentStatus::Canceled)
    );
    assert_eq!(store.count_credential_records().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn loop_drains_queue_then_stops_on_shutdown() {
    let store = seeded_store();
    enqueue(&store, "exp-1", &["pk-1"], &["a"]);
    enqueue(&store, "exp-2", &["pk-1"], &["b"]);
    let (scheduler, _) = scheduler(&store, 200, true);
    let (trigger, signal) = shutdown::channel();

    tokio::join!(scheduler.run(signal), async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        trigger.trigger();
    });

    for id in ["exp-1", "exp-2"] {
        assert_eq!(
            store.experiment_status(id).unwrap(),
            Some(ExperimentStatus::Completed)
        );
    }
}

#[tokio::test(start_paused = true)]
async fn single_row_replay_issues_and_revokes_its_own_key() {
    use crucible_core::confirm::WriteConfirmation;
    use crucible_core::credentials::CredentialBroker;
    use crucible_core::engine::HypothesisExecutor;

    let store = seeded_store();
    enqueue(&store, "exp-1", &["pk-1"], &["rust"]);
    let proxy = Arc::new(FakeProxy {
        store: store.clone(),
        status: 200,
        ingest: true,
        calls: Mutex::new(Vec::new()),
    });
    let broker = CredentialBroker::new(Arc::new(store.clone()), "sk-crucible");
    let executor = HypothesisExecutor::new(
        store.clone(),
        broker,
        proxy.clone(),
        WriteConfirmation::default(),
    );

    let experiment = store.claim_next_queued_experiment().unwrap().unwrap();
    let rows = store.load_dataset_rows(&experiment.dataset_id).unwrap();
    let outcome = executor
        .run_hypothesis(&experiment, &experiment.hypotheses[0], &rows[0])
        .await
        .unwrap();

    assert!(outcome.confirmed);
    assert_eq!(outcome.provider_status, Some(200));
    assert_eq!(proxy.calls.lock().unwrap()[0].request_id, outcome.request_id);
    assert_eq!(store.count_credential_records().unwrap(), 0);

    let runs = store.list_hypothesis_runs("exp-1").unwrap();
    assert_eq!(runs[0].result_request_id, outcome.request_id);
}

#[tokio::test(start_paused = true)]
async fn evaluators_score_each_confirmed_run() {
    let store = seeded_store();
    enqueue_with_evaluators(
        &store,
        "exp-1",
        &["pk-1"],
        &["rust", "sqlite"],
        &[("Accuracy", "0.75"), ("Is Polite", "true")],
    );
    let (scheduler, _) = scheduler(&store, 200, true);
    let (evaluation, sandboxes) = evaluation(&store);
    let scheduler = scheduler.with_evaluation(evaluation);

    let report = scheduler
        .pop_and_run(&ShutdownSignal::never())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.status, ExperimentStatus::Completed);
    assert_eq!(
        report.evaluation,
        Some(EvaluationReport {
            scored: 4,
            ..Default::default()
        })
    );
    for run in store.list_hypothesis_runs("exp-1").unwrap() {
        assert_eq!(
            store.score(&run.result_request_id, "accuracy").unwrap(),
            Some(EvaluatorScore::Numeric(0.75))
        );
        assert_eq!(
            store.score(&run.result_request_id, "is_polite").unwrap(),
            Some(EvaluatorScore::Boolean(true))
        );
    }

    // one sandbox for the organization, fed the logged bodies
    assert_eq!(*sandboxes.tenants.lock().unwrap(), vec!["org-1"]);
    assert_eq!(sandboxes.runs.load(Ordering::SeqCst), 4);
    let sandbox = sandboxes.last.lock().unwrap().clone().unwrap();
    let files = sandbox.files.lock().unwrap();
    let responses: Vec<&Vec<u8>> = files
        .iter()
        .filter(|(path, _)| path.ends_with("/response.json"))
        .map(|(_, body)| body)
        .collect();
    assert_eq!(responses.len(), 4);
    assert!(responses.iter().all(|b| b.as_slice() == RESPONSE_BODY.as_bytes()));
    assert!(files.iter().any(|(path, body)| path.ends_with("/request.json")
        && String::from_utf8_lossy(body).contains("Summarize sqlite")));
}

#[tokio::test(start_paused = true)]
async fn already_scored_runs_are_skipped() {
    let store = seeded_store();
    enqueue_with_evaluators(
        &store,
        "exp-1",
        &["pk-1"],
        &["rust", "sqlite"],
        &[("Accuracy", "0.5")],
    );
    let (scheduler, _) = scheduler(&store, 200, true);
    scheduler
        .pop_and_run(&ShutdownSignal::never())
        .await
        .unwrap();

    let runs = store.list_hypothesis_runs("exp-1").unwrap();
    store
        .record_score(
            &runs[0].result_request_id,
            "accuracy",
            "manual",
            &EvaluatorScore::Numeric(1.0),
        )
        .unwrap();

    let (evaluation, sandboxes) = evaluation(&store);
    let first = evaluation
        .score_experiment("exp-1", "org-1", &ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!((first.scored, first.skipped, first.failed), (1, 1, 0));
    assert_eq!(
        store.score(&runs[0].result_request_id, "accuracy").unwrap(),
        Some(EvaluatorScore::Numeric(1.0))
    );
    assert_eq!(
        store.score(&runs[1].result_request_id, "accuracy").unwrap(),
        Some(EvaluatorScore::Numeric(0.5))
    );

    let again = evaluation
        .score_experiment("exp-1", "org-1", &ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!((again.scored, again.skipped, again.failed), (0, 2, 0));
    assert_eq!(sandboxes.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn evaluator_failures_do_not_fail_the_experiment() {
    let store = seeded_store();
    enqueue_with_evaluators(&store, "exp-1", &["pk-1"], &["rust"], &[("Silent", "")]);
    let (scheduler, _) = scheduler(&store, 200, true);
    let (evaluation, _) = evaluation(&store);
    let scheduler = scheduler.with_evaluation(evaluation);

    let report = scheduler
        .pop_and_run(&ShutdownSignal::never())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.status, ExperimentStatus::Completed);
    assert_eq!(report.evaluation.as_ref().map(|e| e.failed), Some(1));
    let runs = store.list_hypothesis_runs("exp-1").unwrap();
    assert!(!store.score_exists(&runs[0].result_request_id, "silent").unwrap());
    assert_eq!(
        store.experiment_status("exp-1").unwrap(),
        Some(ExperimentStatus::Completed)
    );
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_runs_are_not_evaluated() {
    let store = seeded_store();
    enqueue_with_evaluators(&store, "exp-1", &["pk-1"], &["rust"], &[("Accuracy", "1")]);
    let (scheduler, _) = scheduler(&store, 500, false);
    let (evaluation, sandboxes) = evaluation(&store);
    let scheduler = scheduler.with_evaluation(evaluation);

    let report = scheduler
        .pop_and_run(&ShutdownSignal::never())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.evaluation, Some(EvaluationReport::default()));
    assert!(sandboxes.tenants.lock().unwrap().is_empty());
}
