use crate::cli::args::EnqueueArgs;
use crate::exit_codes::{COMMAND_FAILED, SUCCESS};
use anyhow::Context;
use crucible_core::model::{InputRecord, NewEvaluator, NewExperiment, NewHypothesis};
use crucible_core::{EngineConfig, Store};
use serde::Deserialize;
use std::path::Path;

/// Everything needed to run an experiment against a fresh local store.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentFile {
    pub organization: OrganizationSeed,
    #[serde(default)]
    pub provider_keys: Vec<ProviderKeySeed>,
    #[serde(default)]
    pub prompt_versions: Vec<PromptVersionSeed>,
    pub experiment: ExperimentSeed,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrganizationSeed {
    pub id: String,
    pub owner_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderKeySeed {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptVersionSeed {
    pub id: String,
    pub template: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentSeed {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub dataset_id: Option<String>,
    pub rows: Vec<InputRecord>,
    pub hypotheses: Vec<NewHypothesis>,
    #[serde(default)]
    pub evaluators: Vec<NewEvaluator>,
}

impl ExperimentFile {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading experiment file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing experiment file {}", path.display()))
    }

    /// Seed the referenced rows, then insert the experiment as queued.
    pub fn apply(&self, store: &Store) -> anyhow::Result<String> {
        let org = &self.organization.id;
        store.upsert_organization(org, &self.organization.owner_id)?;
        for key in &self.provider_keys {
            store.upsert_provider_key(&key.id, org, &key.name)?;
        }
        for pv in &self.prompt_versions {
            store.upsert_prompt_version(&pv.id, org, &pv.template)?;
        }
        let id = store.enqueue_experiment(&NewExperiment {
            id: self.experiment.id.clone(),
            organization_id: org.clone(),
            dataset_id: self.experiment.dataset_id.clone(),
            rows: self.experiment.rows.clone(),
            hypotheses: self.experiment.hypotheses.clone(),
            evaluators: self.experiment.evaluators.clone(),
        })?;
        Ok(id)
    }
}

pub fn run(args: EnqueueArgs, cfg: EngineConfig) -> anyhow::Result<i32> {
    let file = ExperimentFile::from_path(&args.file)?;
    let store = super::open_store(&cfg)?;

    match file.apply(&store) {
        Ok(id) => {
            tracing::info!(
                experiment_id = %id,
                rows = file.experiment.rows.len(),
                hypotheses = file.experiment.hypotheses.len(),
                evaluators = file.experiment.evaluators.len(),
                "experiment enqueued"
            );
            println!("{id}");
            Ok(SUCCESS)
        }
        Err(e) => {
            eprintln!("enqueue failed: {e:#}");
            Ok(COMMAND_FAILED)
        }
    }
}
