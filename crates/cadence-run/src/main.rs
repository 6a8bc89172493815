//! Orchestrator entry point: one coupled execution from a parameter file.
//!
//! Loads the run configuration, republishes it at the result-tree root for
//! the children, then launches and supervises the run. Ctrl-C aborts
//! pending startup waits; already-launched children are left to finish on
//! their own.

use anyhow::{Context, Result};
use cadence_core::config::RunConfig;
use cadence_core::logging::init_file_logging;
use cadence_core::orchestrator::Orchestrator;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cadence-run")]
#[command(about = "Launch and supervise one coupled simulation run")]
struct Args {
    /// Path to the run's parameter file.
    parameter_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = RunConfig::load(&args.parameter_file).context("load parameter file")?;
    init_file_logging(
        &config.result_path,
        "orchestrator",
        config.coupling.level_log,
    )
    .context("initialize logging")?;

    // Children load the parameter file from the result tree; republish it
    // there and wait until it is visible before anything launches.
    let run_parameter = config.parameter_file();
    config
        .save(&run_parameter)
        .context("publish parameter file")?;
    while !run_parameter.exists() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let orchestrator = Orchestrator::new(config);
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, aborting startup waits");
            cancel.cancel();
        }
    });

    let summary = orchestrator.run().await?;
    info!("run complete: {} child(ren) joined", summary.exits.len());
    Ok(())
}
