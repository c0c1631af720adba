use crate::exit_codes::SUCCESS;
use crucible_core::engine::ExperimentScheduler;
use crucible_core::shutdown::ShutdownCoordinator;
use crucible_core::EngineConfig;

pub async fn run(mut cfg: EngineConfig) -> anyhow::Result<i32> {
    let store = super::open_store(&cfg)?;
    let transport = super::http_transport(&cfg)?;
    let pool = super::local_sandboxes(&mut cfg);
    let coordinator = ShutdownCoordinator::install(pool.clone())?;

    tracing::info!(
        database_path = %cfg.database_path.display(),
        provider_base_url = %cfg.provider_base_url,
        sandbox_concurrency = cfg.sandbox.concurrency,
        "worker starting"
    );

    let scheduler = ExperimentScheduler::from_config_with_sandboxes(&cfg, store, transport, pool);
    scheduler.run(coordinator.signal()).await;

    let torn_down = coordinator.wait().await;
    tracing::info!(sandboxes_torn_down = torn_down, "worker stopped");
    Ok(SUCCESS)
}
