use crate::cli::args::{OutputFormat, TickArgs};
use crate::exit_codes::{COMMAND_FAILED, SUCCESS};
use crucible_core::engine::{ExperimentReport, ExperimentScheduler};
use crucible_core::model::ExperimentStatus;
use crucible_core::shutdown::ShutdownCoordinator;
use crucible_core::EngineConfig;

pub async fn run(args: TickArgs, mut cfg: EngineConfig) -> anyhow::Result<i32> {
    let store = super::open_store(&cfg)?;
    let transport = super::http_transport(&cfg)?;
    let pool = super::local_sandboxes(&mut cfg);
    let coordinator = ShutdownCoordinator::install(pool.clone())?;
    let scheduler = ExperimentScheduler::from_config_with_sandboxes(&cfg, store, transport, pool);

    match tick_once(&scheduler, coordinator).await {
        Ok(report) => {
            print_report(report.as_ref(), args.format)?;
            let interrupted = report.is_some_and(|r| r.status == ExperimentStatus::Canceled);
            Ok(if interrupted { COMMAND_FAILED } else { SUCCESS })
        }
        Err(e) => {
            eprintln!("tick failed: {e:#}");
            Ok(COMMAND_FAILED)
        }
    }
}

/// One tick under the coordinator's signal. The pool is torn down before
/// returning; an interrupted tick has already revoked its proxy credential.
pub(crate) async fn tick_once(
    scheduler: &ExperimentScheduler,
    coordinator: ShutdownCoordinator,
) -> anyhow::Result<Option<ExperimentReport>> {
    let result = scheduler.pop_and_run(&coordinator.signal()).await;
    let torn_down = coordinator.shutdown().await;
    tracing::debug!(sandboxes_torn_down = torn_down, "tick finished");
    result
}

fn print_report(report: Option<&ExperimentReport>, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let value = match report {
                Some(r) => serde_json::json!({ "claimed": true, "report": r }),
                None => serde_json::json!({ "claimed": false }),
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => match report {
            None => println!("no queued experiment"),
            Some(r) => {
                println!("experiment {}: {}", r.experiment_id, r.status.as_str());
                for h in &r.hypotheses {
                    println!(
                        "  hypothesis {}: {} ({} confirmed, {} failed)",
                        h.hypothesis_id,
                        h.status.as_str(),
                        h.rows_confirmed,
                        h.rows_failed
                    );
                }
                if let Some(e) = &r.evaluation {
                    println!(
                        "  evaluation: {} scored, {} skipped, {} failed",
                        e.scored, e.skipped, e.failed
                    );
                }
            }
        },
    }
    Ok(())
}
