use crate::cli::args::{EvaluateArgs, OutputFormat};
use crate::exit_codes::{COMMAND_FAILED, SUCCESS};
use anyhow::Context;
use crucible_core::evaluator::{EvaluatorInvocation, EvaluatorOutcome, EvaluatorRunner};
use crucible_core::EngineConfig;
use std::path::Path;

pub async fn run(args: EvaluateArgs, mut cfg: EngineConfig) -> anyhow::Result<i32> {
    let invocation = EvaluatorInvocation::new(
        read(&args.code, "evaluator code")?,
        read(&args.request, "request payload")?,
        read(&args.response, "response payload")?,
        args.tenant.clone(),
    );

    let pool = super::local_sandboxes(&mut cfg);
    let runner = EvaluatorRunner::new(pool.clone(), &cfg.sandbox);

    let result = runner.run(&invocation).await;
    pool.shutdown_all().await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("evaluator failed ({}): {e}", e.kind());
            return Ok(COMMAND_FAILED);
        }
    };
    report(&outcome, args.format)
}

fn report(outcome: &EvaluatorOutcome, format: OutputFormat) -> anyhow::Result<i32> {
    let score = outcome.score();
    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "score": score.as_ref().ok(),
                "error": score.as_ref().err().map(|e| e.to_string()),
                "exit_code": outcome.exit_code,
                "traces": outcome.traces,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            for line in &outcome.traces {
                eprintln!("{line}");
            }
            match &score {
                Ok(s) => println!("score: {s}"),
                Err(e) => eprintln!("no score: {e}"),
            }
        }
    }
    Ok(if score.is_ok() { SUCCESS } else { COMMAND_FAILED })
}

fn read(path: &Path, what: &str) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {what} from {}", path.display()))
}
