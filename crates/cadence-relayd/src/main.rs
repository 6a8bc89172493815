//! Relay daemon: receives one device's windowed stream and persists it.
//!
//! Launched by the orchestrator once per recorder device. Binds a channel,
//! publishes its address for the sending simulator, accepts the configured
//! ranks, and runs the translator engine against a file sink. The exit
//! code is non-zero on any protocol or storage failure, which the
//! orchestrator surfaces as a failed run.

use anyhow::{Context, Result};
use cadence_core::channel::ChannelListener;
use cadence_core::config::{RunConfig, PARAMETER_FILE};
use cadence_core::handshake;
use cadence_core::logging::init_file_logging;
use cadence_core::storage::FileBatchSink;
use cadence_core::translator::{TranslatorConfig, TranslatorEngine};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cadence-relayd")]
#[command(about = "Windowed relay daemon for one device stream")]
struct Args {
    /// Result-tree root holding the parameter file.
    result_path: PathBuf,

    /// Endpoint file to publish, relative to the result root.
    endpoint_file: PathBuf,

    /// Output stem for batch files.
    save_stem: PathBuf,

    /// End of the recorded interval, in simulated milliseconds.
    end: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = RunConfig::load(&args.result_path.join(PARAMETER_FILE))
        .context("load parameter file")?;

    let name = args
        .save_stem
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("relay")
        .to_string();
    init_file_logging(
        &args.result_path,
        &format!("relay_{name}"),
        config.recording.level_log,
    )
    .context("initialize logging")?;

    let nb_step = (args.end / config.recording.synchronization).ceil() as u64;
    let ranks = config.coupling.nb_rank_spiking.max(1) as usize;
    info!(
        "relay {name}: {nb_step} window(s), flush every {}, {ranks} sender rank(s)",
        config.recording.save_step
    );

    let listener = ChannelListener::bind().await?;
    handshake::publish(
        &args.result_path.join(&args.endpoint_file),
        listener.address(),
    )?;

    let peers = listener.accept_ranks(ranks).await?;
    info!("all {ranks} rank(s) connected");

    let engine = TranslatorEngine::new(
        TranslatorConfig {
            nb_step,
            save_step: config.recording.save_step,
        },
        FileBatchSink::new(&args.save_stem),
    )?;
    let report = engine.run(peers).await?;

    info!(
        "relay {name} done: {} window(s) in {} batch(es){}",
        report.windows,
        report.batches,
        if report.stopped_early {
            ", stream ended early"
        } else {
            ""
        }
    );
    Ok(())
}
