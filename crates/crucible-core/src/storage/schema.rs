//! SQLite schema for the experiment engine.
//!
//! Tables:
//! - `organizations`, `provider_keys`, `prompt_versions`: reference data
//! - `experiments`, `hypotheses`, `dataset_rows`: queued work
//! - `hypothesis_runs`: one row per (hypothesis, dataset row), upserted
//! - `request_logs`: written by the ingestion path, polled for confirmation
//! - `credentials`: ephemeral key hashes, deleted after a single use
//! - `experiment_evaluators`: code evaluators attached to an experiment
//! - `scores`: one evaluator score per (request, score name)

/// DDL for the engine tables.
///
/// Schema version: 2
pub const ENGINE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS organizations (
    id               TEXT PRIMARY KEY,
    owner_id         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS provider_keys (
    id               TEXT PRIMARY KEY,
    organization_id  TEXT NOT NULL REFERENCES organizations(id),
    name             TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS prompt_versions (
    id               TEXT PRIMARY KEY,
    organization_id  TEXT NOT NULL REFERENCES organizations(id),
    template_json    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS experiments (
    id               TEXT PRIMARY KEY,
    organization_id  TEXT NOT NULL,
    dataset_id       TEXT NOT NULL,
    status           TEXT NOT NULL DEFAULT 'queued',
    created_at       TEXT NOT NULL,
    started_at       TEXT,
    finished_at      TEXT
);

CREATE TABLE IF NOT EXISTS dataset_rows (
    id               TEXT PRIMARY KEY,
    dataset_id       TEXT NOT NULL,
    position         INTEGER NOT NULL,
    request_path     TEXT NOT NULL,
    inputs_json      TEXT NOT NULL,
    UNIQUE(dataset_id, position)
);

CREATE TABLE IF NOT EXISTS hypotheses (
    id                TEXT PRIMARY KEY,
    experiment_id     TEXT NOT NULL REFERENCES experiments(id),
    position          INTEGER NOT NULL,
    prompt_version_id TEXT NOT NULL,
    model             TEXT NOT NULL,
    provider_key_id   TEXT NOT NULL,
    status            TEXT NOT NULL DEFAULT 'pending'
);

CREATE TABLE IF NOT EXISTS hypothesis_runs (
    experiment_id     TEXT NOT NULL,
    hypothesis_id     TEXT NOT NULL REFERENCES hypotheses(id),
    row_id            TEXT NOT NULL REFERENCES dataset_rows(id),
    result_request_id TEXT NOT NULL,
    status            TEXT NOT NULL,
    error             TEXT,
    updated_at        TEXT NOT NULL,
    UNIQUE(hypothesis_id, row_id)
);

CREATE TABLE IF NOT EXISTS request_logs (
    request_id       TEXT PRIMARY KEY,
    organization_id  TEXT NOT NULL,
    status_code      INTEGER,
    request_body     TEXT,
    response_body    TEXT,
    received_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS credentials (
    id               TEXT PRIMARY KEY,
    kind             TEXT NOT NULL,
    secret_hash      TEXT NOT NULL UNIQUE,
    owner_id         TEXT NOT NULL,
    organization_id  TEXT NOT NULL,
    provider_key_id  TEXT,
    label            TEXT NOT NULL,
    created_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS experiment_evaluators (
    id               TEXT PRIMARY KEY,
    experiment_id    TEXT NOT NULL REFERENCES experiments(id),
    position         INTEGER NOT NULL,
    name             TEXT NOT NULL,
    score_name       TEXT NOT NULL,
    code             TEXT NOT NULL,
    UNIQUE(experiment_id, score_name)
);

CREATE TABLE IF NOT EXISTS scores (
    request_id       TEXT NOT NULL,
    score_name       TEXT NOT NULL,
    evaluator_id     TEXT NOT NULL,
    value_type       TEXT NOT NULL,
    value            REAL NOT NULL,
    created_at       TEXT NOT NULL,
    UNIQUE(request_id, score_name)
);

CREATE INDEX IF NOT EXISTS idx_experiments_status_created
    ON experiments(status, created_at);
CREATE INDEX IF NOT EXISTS idx_hypotheses_experiment
    ON hypotheses(experiment_id, position);
CREATE INDEX IF NOT EXISTS idx_hypothesis_runs_experiment
    ON hypothesis_runs(experiment_id);
"#;
