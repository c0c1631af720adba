use clap::{Parser, Subcommand, ValueEnum};
use crucible_core::config::ConfigError;
use crucible_core::EngineConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "crucible",
    version,
    about = "Replay prompt experiments through the provider proxy and score outputs in sandboxes"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler loop until SIGINT/SIGTERM
    Worker,
    /// Claim and run at most one queued experiment
    Tick(TickArgs),
    /// Insert an experiment from a YAML file as queued
    Enqueue(EnqueueArgs),
    /// Run one code evaluator in a local sandbox and print its score
    Evaluate(EvaluateArgs),
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Engine config (YAML). Missing fields take defaults.
    #[arg(long, global = true, env = "CRUCIBLE_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub database_path: Option<PathBuf>,

    #[arg(long, global = true)]
    pub provider_base_url: Option<String>,

    #[arg(long, global = true)]
    pub sandbox_concurrency: Option<usize>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl GlobalArgs {
    /// Defaults, file, environment, then these flags.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let mut cfg = EngineConfig::load(self.config.as_deref())?;
        if let Some(path) = &self.database_path {
            cfg.database_path = path.clone();
        }
        if let Some(url) = &self.provider_base_url {
            cfg.provider_base_url = url.clone();
        }
        if let Some(n) = self.sandbox_concurrency {
            cfg.sandbox.concurrency = n;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(clap::Args, Debug, Clone)]
pub struct TickArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(clap::Args, Debug, Clone)]
pub struct EnqueueArgs {
    /// Experiment file: organization, provider keys, prompt versions, rows, hypotheses
    #[arg(long)]
    pub file: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct EvaluateArgs {
    /// Evaluator script
    #[arg(long)]
    pub code: PathBuf,

    /// Request payload handed to the script as request.json
    #[arg(long)]
    pub request: PathBuf,

    /// Response payload handed to the script as response.json
    #[arg(long)]
    pub response: PathBuf,

    /// Sandbox reuse key, usually the organization id
    #[arg(long, default_value = "local")]
    pub tenant: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}
