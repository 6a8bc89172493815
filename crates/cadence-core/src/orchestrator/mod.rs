//! Run supervision: directory preparation, dependency-ordered launching,
//! and the final join.
//!
//! Launch order follows the rendezvous dependencies: a process that must
//! discover another's channel address is started only after the matching
//! handshake has been satisfied. Independent region waits proceed
//! concurrently. The join collects every child's exit status; any
//! non-zero exit fails the run. Children are never killed: a hung child
//! blocks the join until it exits on its own.

mod launcher;

pub use launcher::{launch, ChildSpec, ProcessHandle};

use crate::cancel::CancellationToken;
use crate::config::{RunConfig, RunPaths};
use crate::handshake::{self, parse_id_list, WaitOptions, MARKER_SUFFIX};
use crate::{CadenceError, Result};
use futures::future::try_join_all;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Outcome of a completed run.
#[derive(Debug)]
pub struct RunSummary {
    /// (child name, exit code) for every launched child, in join order.
    pub exits: Vec<(String, Option<i32>)>,
}

/// Supervises one coupled execution.
pub struct Orchestrator {
    config: RunConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts pending startup waits when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run to completion: prepare the tree, launch in dependency order,
    /// join every child.
    pub async fn run(&self) -> Result<RunSummary> {
        let results = &self.config.result_path;
        prepare_run_tree(results)?;
        let removed = remove_stale_markers(results)?;
        if removed > 0 {
            warn!("removed {removed} stale handshake marker(s) from a previous run");
        }

        info!(
            "run begins: {} window(s) of {} ms, flush every {}",
            self.config.nb_step(),
            self.config.recording.synchronization,
            self.config.recording.save_step
        );

        let children = if self.config.coupling.co_simulation {
            self.launch_co_simulation().await?
        } else if self.config.coupling.nb_rank_spiking > 0 {
            if self.config.coupling.record {
                self.launch_record().await?
            } else {
                vec![launch(&self.spiking_spec(false))?]
            }
        } else {
            vec![launch(&self.field_spec()?)?]
        };

        self.join_children(children).await
    }

    fn wait_options(&self) -> WaitOptions {
        WaitOptions::startup(self.cancel.clone())
    }

    fn child_log(&self, name: &str) -> PathBuf {
        self.config.log_dir().join(format!("{name}.log"))
    }

    /// The spiking simulator: result root, rank count, and whether to
    /// publish its device ids before entering the main loop.
    fn spiking_spec(&self, publish_devices: bool) -> ChildSpec {
        let results = &self.config.result_path;
        ChildSpec::new("spiking", &self.config.coupling.commands.spiking, results)
            .arg(results.display().to_string())
            .arg(self.config.coupling.nb_rank_spiking.to_string())
            .arg(if publish_devices { "1" } else { "0" })
            .log_file(self.child_log("spiking"))
    }

    fn field_spec(&self) -> Result<ChildSpec> {
        let command = self
            .config
            .coupling
            .commands
            .field
            .as_ref()
            .ok_or_else(|| CadenceError::Config {
                message: "field simulator command missing".to_string(),
            })?;
        let results = &self.config.result_path;
        Ok(ChildSpec::new("field", command, results)
            .arg(results.display().to_string())
            .log_file(self.child_log("field")))
    }

    /// Storage relay for one recorder: result root, endpoint file to
    /// publish, output stem, end time.
    fn record_relay_spec(&self, command: &Path, recorder: u64) -> ChildSpec {
        let results = &self.config.result_path;
        ChildSpec::new(format!("relay-record-{recorder}"), command, results)
            .arg(results.display().to_string())
            .arg(format!("{}/{recorder}.txt", RunPaths::RECORDER_DIR))
            .arg(self.config.save_stem(recorder).display().to_string())
            .arg(self.config.end.to_string())
            .log_file(self.child_log(&format!("relay_record_{recorder}")))
    }

    fn into_field_relay_spec(&self, command: &Path, recorder: u64, region: u64) -> ChildSpec {
        let results = &self.config.result_path;
        ChildSpec::new(format!("relay-into-field-{recorder}"), command, results)
            .arg(results.display().to_string())
            .arg(format!("{}/{recorder}.txt", RunPaths::RECORDER_DIR))
            .arg(format!("{}/{region}.txt", RunPaths::INTO_FIELD_DIR))
            .log_file(self.child_log(&format!("relay_into_field_{recorder}")))
    }

    fn from_field_relay_spec(&self, command: &Path, injector: u64, region: u64) -> ChildSpec {
        let results = &self.config.result_path;
        ChildSpec::new(format!("relay-from-field-{injector}"), command, results)
            .arg(results.display().to_string())
            .arg(format!("{}/{injector}.txt", RunPaths::INJECTOR_DIR))
            .arg(format!("{}/{region}.txt", RunPaths::FROM_FIELD_DIR))
            .log_file(self.child_log(&format!("relay_from_field_{injector}")))
    }

    async fn launch_co_simulation(&self) -> Result<Vec<ProcessHandle>> {
        let commands = &self.config.coupling.commands;
        let into_field =
            commands
                .relay_into_field
                .clone()
                .ok_or_else(|| CadenceError::Config {
                    message: "relay_into_field command missing".to_string(),
                })?;
        let from_field =
            commands
                .relay_from_field
                .clone()
                .ok_or_else(|| CadenceError::Config {
                    message: "relay_from_field command missing".to_string(),
                })?;

        let mut children = vec![launch(&self.spiking_spec(true))?];

        let recorders = parse_id_list(
            &handshake::await_and_consume(&self.config.recorder_ids_file(), &self.wait_options())
                .await?,
        )?;
        let injectors = parse_id_list(
            &handshake::await_and_consume(&self.config.injector_ids_file(), &self.wait_options())
                .await?,
        )?;
        info!(
            "spiking devices ready: {} recorder(s), {} injector(s)",
            recorders.len(),
            injectors.len()
        );

        children.push(launch(&self.field_spec()?)?);
        // One readiness file per coupled region; the waits are independent.
        try_join_all(self.config.coupling.region_ids.iter().map(|region| {
            let path = self.config.from_field_endpoint_file(*region);
            let options = self.wait_options();
            async move { handshake::await_and_consume(&path, &options).await }
        }))
        .await?;
        info!("field simulator ready");

        for (recorder, region) in recorders.iter().zip(&self.config.coupling.region_ids) {
            children.push(launch(&self.into_field_relay_spec(
                &into_field,
                *recorder,
                *region,
            ))?);
        }
        for (injector, region) in injectors.iter().zip(&self.config.coupling.region_ids) {
            children.push(launch(&self.from_field_relay_spec(
                &from_field,
                *injector,
                *region,
            ))?);
        }
        Ok(children)
    }

    async fn launch_record(&self) -> Result<Vec<ProcessHandle>> {
        let command = self
            .config
            .coupling
            .commands
            .relay_record
            .clone()
            .ok_or_else(|| CadenceError::Config {
                message: "relay_record command missing".to_string(),
            })?;

        let mut children = vec![launch(&self.spiking_spec(true))?];

        let recorders = parse_id_list(
            &handshake::await_and_consume(&self.config.recorder_ids_file(), &self.wait_options())
                .await?,
        )?;
        info!("recording {} device stream(s)", recorders.len());

        for recorder in recorders {
            children.push(launch(&self.record_relay_spec(&command, recorder))?);
        }
        Ok(children)
    }

    async fn join_children(&self, children: Vec<ProcessHandle>) -> Result<RunSummary> {
        let mut exits = Vec::with_capacity(children.len());
        for child in children {
            let name = child.name.clone();
            let status = tokio::task::spawn_blocking(move || child.wait())
                .await
                .map_err(|e| CadenceError::Other(format!("join task panicked: {e}")))??;
            info!("{name} exited with {status}");
            exits.push((name, status.code()));
        }

        let failures: Vec<String> = exits
            .iter()
            .filter(|(_, code)| *code != Some(0))
            .map(|(name, code)| match code {
                Some(code) => format!("{name} (exit {code})"),
                None => format!("{name} (killed by signal)"),
            })
            .collect();
        if !failures.is_empty() {
            return Err(CadenceError::ChildrenFailed {
                failed: failures.len(),
                details: failures.join(", "),
            });
        }

        info!("all {} child(ren) exited cleanly", exits.len());
        Ok(RunSummary { exits })
    }
}

/// Create the run directory tree.
pub fn prepare_run_tree(results: &Path) -> Result<()> {
    for dir in [
        RunPaths::LOG_DIR,
        RunPaths::SPIKING_DIR,
        RunPaths::FIELD_DIR,
        RunPaths::RELAY_DIR,
        RunPaths::RECORDER_DIR,
        RunPaths::INJECTOR_DIR,
        RunPaths::INTO_FIELD_DIR,
        RunPaths::FROM_FIELD_DIR,
        RunPaths::SAVE_DIR,
    ] {
        let path = results.join(dir);
        fs::create_dir_all(&path).map_err(|e| CadenceError::Io {
            message: "failed to create run directory".to_string(),
            path: Some(path.clone()),
            source: Some(e),
        })?;
    }
    Ok(())
}

/// Delete leftover handshake markers under `results`.
///
/// A marker surviving a previous run would admit a reader to a stale
/// address.
pub fn remove_stale_markers(results: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in WalkDir::new(results).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        let is_marker = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(MARKER_SUFFIX));
        if path.is_file() && is_marker {
            fs::remove_file(path).map_err(|e| CadenceError::Io {
                message: "failed to remove stale marker".to_string(),
                path: Some(path.to_path_buf()),
                source: Some(e),
            })?;
            removed += 1;
        }
    }
    Ok(removed)
}
