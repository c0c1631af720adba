use super::super::args::{Cli, Command};
use crate::exit_codes::SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    if let Command::Version = cli.cmd {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let cfg = cli.global.engine_config()?;
    match cli.cmd {
        Command::Worker => super::worker::run(cfg).await,
        Command::Tick(args) => super::tick::run(args, cfg).await,
        Command::Enqueue(args) => super::enqueue::run(args, cfg),
        Command::Evaluate(args) => super::evaluate::run(args, cfg).await,
        Command::Version => Ok(SUCCESS),
    }
}
