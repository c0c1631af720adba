use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Queued => "queued",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Failed => "failed",
            ExperimentStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(ExperimentStatus::Queued),
            "running" => Some(ExperimentStatus::Running),
            "completed" => Some(ExperimentStatus::Completed),
            "failed" => Some(ExperimentStatus::Failed),
            "canceled" => Some(ExperimentStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExperimentStatus::Completed | ExperimentStatus::Failed | ExperimentStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypothesisStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl HypothesisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HypothesisStatus::Pending => "pending",
            HypothesisStatus::Running => "running",
            HypothesisStatus::Completed => "completed",
            HypothesisStatus::Failed => "failed",
            HypothesisStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(HypothesisStatus::Pending),
            "running" => Some(HypothesisStatus::Running),
            "completed" => Some(HypothesisStatus::Completed),
            "failed" => Some(HypothesisStatus::Failed),
            "canceled" => Some(HypothesisStatus::Canceled),
            _ => None,
        }
    }
}

/// A claimed experiment together with its hypotheses in load order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experiment {
    pub id: String,
    pub organization_id: String,
    pub dataset_id: String,
    pub status: ExperimentStatus,
    pub hypotheses: Vec<Hypothesis>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hypothesis {
    pub id: String,
    pub experiment_id: String,
    pub prompt_version_id: String,
    pub model: String,
    pub provider_key_id: String,
    pub status: HypothesisStatus,
}

/// Request path template plus the named inputs substituted into the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    pub request_path: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRow {
    pub id: String,
    pub input_record: InputRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Confirmed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Confirmed => "confirmed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(RunStatus::Confirmed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Links one dataset row and one hypothesis to the provider call that served it.
///
/// Unique on `(hypothesis_id, row_id)`; writes are upserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HypothesisRun {
    pub experiment_id: String,
    pub hypothesis_id: String,
    pub row_id: String,
    pub result_request_id: String,
    pub status: RunStatus,
    pub error: Option<String>,
}

/// Experiment submission as accepted by `Store::enqueue_experiment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewExperiment {
    #[serde(default)]
    pub id: Option<String>,
    pub organization_id: String,
    #[serde(default)]
    pub dataset_id: Option<String>,
    pub rows: Vec<InputRecord>,
    pub hypotheses: Vec<NewHypothesis>,
    /// Code evaluators scored against every confirmed run once the
    /// experiment finishes.
    #[serde(default)]
    pub evaluators: Vec<NewEvaluator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewHypothesis {
    pub prompt_version_id: String,
    pub model: String,
    pub provider_key_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewEvaluator {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub code: String,
}

/// A code evaluator attached to an experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentEvaluator {
    pub id: String,
    pub experiment_id: String,
    pub name: String,
    /// Key its scores are stored under; see [`score_name`].
    pub score_name: String,
    pub code: String,
}

lazy_static::lazy_static! {
    static ref NON_ALNUM: regex::Regex = regex::Regex::new("[^a-z0-9]+").unwrap();
}

/// Score key for an evaluator name: lowercased, with every run of other
/// characters collapsed to `_`.
pub fn score_name(evaluator_name: &str) -> String {
    let lowered = evaluator_name.to_lowercase().replacen(' ', "_", 1);
    NON_ALNUM.replace_all(&lowered, "_").into_owned()
}

/// Request and response bodies captured with a request log. Missing bodies
/// read as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestBodies {
    pub request_body: String,
    pub response_body: String,
}
