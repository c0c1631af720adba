//! Binary-level contract: exit codes and printed output for each subcommand.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

const ENV_VARS: &[&str] = &[
    "CRUCIBLE_CONFIG",
    "CRUCIBLE_DATABASE_PATH",
    "CRUCIBLE_PROVIDER_BASE_URL",
    "CRUCIBLE_POLL_INTERVAL_MS",
    "CRUCIBLE_ROW_GRACE_PERIOD_MS",
    "CRUCIBLE_SANDBOX_CONCURRENCY",
];

/// Fast config: no grace period, a confirmation budget of a few ms and a
/// proxy URL nothing listens on.
fn workspace() -> TempDir {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("crucible.yaml"),
        format!(
            "database_path: {}\n\
             provider_base_url: http://127.0.0.1:9\n\
             row_grace_period_ms: 0\n\
             confirmation:\n  initial_wait_ms: 1\n  max_wait_ms: 5\n\
             sandbox:\n  interpreter: sh\n  operation_timeout_ms: 5000\n",
            dir.path().join("crucible.db").display()
        ),
    )
    .unwrap();
    dir
}

fn crucible(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("crucible").unwrap();
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd.env("RUST_LOG", "warn")
        .current_dir(dir)
        .arg("--config")
        .arg(dir.join("crucible.yaml"));
    cmd
}

const EXPERIMENT: &str = r#"
organization:
  id: org-1
  owner_id: user-1
provider_keys:
  - id: pk-1
    name: openai
prompt_versions:
  - id: pv-1
    template:
      messages:
        - role: user
          content: 'Say <prompt-input key="word" />'
experiment:
  id: exp-cli
  rows:
    - request_path: /v1/chat/completions
      inputs:
        word: hi
    - request_path: /v1/chat/completions
      inputs:
        word: bye
  hypotheses:
    - prompt_version_id: pv-1
      model: gpt-4o-mini
      provider_key_id: pk-1
"#;

#[test]
fn version_prints_package_version() {
    let dir = workspace();
    crucible(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn tick_on_empty_store_is_idle() {
    let dir = workspace();
    crucible(dir.path())
        .arg("tick")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("no queued experiment"));
}

#[test]
fn enqueue_then_tick_runs_the_experiment() {
    let dir = workspace();
    let file = dir.path().join("experiment.yaml");
    fs::write(&file, EXPERIMENT).unwrap();

    crucible(dir.path())
        .args(["enqueue", "--file"])
        .arg(&file)
        .assert()
        .code(0)
        .stdout(predicate::str::diff("exp-cli\n"));

    let out = crucible(dir.path())
        .args(["tick", "--format", "json"])
        .assert()
        .code(0)
        .get_output()
        .stdout
        .clone();
    let v: Value = serde_json::from_slice(&out).unwrap();

    // nothing ingests the calls, so both rows end unconfirmed
    assert_eq!(v["claimed"], true);
    assert_eq!(v["report"]["experiment_id"], "exp-cli");
    assert_eq!(v["report"]["status"], "completed");
    assert_eq!(v["report"]["hypotheses"][0]["rows_failed"], 2);

    crucible(dir.path())
        .arg("tick")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("no queued experiment"));
}

#[test]
fn malformed_experiment_file_is_an_internal_error() {
    let dir = workspace();
    let file = dir.path().join("experiment.yaml");
    fs::write(&file, "organization: [not, a, map]\n").unwrap();

    crucible(dir.path())
        .args(["enqueue", "--file"])
        .arg(&file)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("parsing experiment file"));
}

#[test]
fn unknown_config_field_is_an_internal_error() {
    let dir = workspace();
    fs::write(dir.path().join("crucible.yaml"), "poll_intervall_ms: 10\n").unwrap();

    crucible(dir.path()).arg("tick").assert().code(2);
}

#[test]
fn evaluate_prints_the_score() {
    let dir = workspace();
    fs::write(
        dir.path().join("eval.sh"),
        "echo checking\ngrep -q hello response.json && printf 0.5 > output.txt\n",
    )
    .unwrap();
    fs::write(dir.path().join("request.json"), "{}").unwrap();
    fs::write(dir.path().join("response.json"), r#"{"text":"hello"}"#).unwrap();

    crucible(dir.path())
        .args([
            "evaluate",
            "--code",
            "eval.sh",
            "--request",
            "request.json",
            "--response",
            "response.json",
            "--tenant",
            "org-1",
        ])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("score: 0.5"))
        .stderr(predicate::str::contains("checking"));
}

#[test]
fn evaluate_without_output_fails_the_command() {
    let dir = workspace();
    fs::write(dir.path().join("eval.sh"), "true\n").unwrap();
    fs::write(dir.path().join("payload.json"), "{}").unwrap();

    crucible(dir.path())
        .args([
            "evaluate",
            "--code",
            "eval.sh",
            "--request",
            "payload.json",
            "--response",
            "payload.json",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Score is undefined"));
}
