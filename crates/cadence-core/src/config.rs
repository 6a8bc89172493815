//! Run configuration: the parameter file shared by every process in a run.
//!
//! The orchestrator writes `parameter.json` at the root of the result tree
//! and every child process loads the same file. Knobs that are not per-run
//! (poll intervals, wire limits, directory names) live in the const-holder
//! structs below.

use crate::{CadenceError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// File name of the parameter file at the result-tree root.
pub const PARAMETER_FILE: &str = "parameter.json";

/// Timing knobs shared across components.
pub struct TimingConfig;

impl TimingConfig {
    /// Sleep between handshake-marker polls.
    pub const HANDSHAKE_POLL_INTERVAL: Duration = Duration::from_secs(1);
    /// Deadline the orchestrator applies to each startup handshake.
    pub const STARTUP_WAIT_TIMEOUT: Duration = Duration::from_secs(300);
    /// Timeout for connecting to a discovered channel address.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Wire-level limits for the data channel.
pub struct ChannelLimits;

impl ChannelLimits {
    /// Maximum number of f64 values accepted in one `Data` payload.
    pub const MAX_PAYLOAD_VALUES: usize = 16 * 1024 * 1024;
}

/// Directory and file names inside the result tree.
pub struct RunPaths;

impl RunPaths {
    pub const LOG_DIR: &'static str = "log";
    pub const SPIKING_DIR: &'static str = "spiking";
    pub const FIELD_DIR: &'static str = "field";
    pub const RELAY_DIR: &'static str = "relay";
    /// Endpoint files of the relays attached to recorder devices.
    pub const RECORDER_DIR: &'static str = "relay/recorder";
    /// Endpoint files of the relays attached to injector devices.
    pub const INJECTOR_DIR: &'static str = "relay/injector";
    /// Endpoint files the field simulator reads from, per region.
    pub const INTO_FIELD_DIR: &'static str = "relay/into_field";
    /// Readiness files the field simulator publishes, per region.
    pub const FROM_FIELD_DIR: &'static str = "relay/from_field";
    /// Batch files written by storage relays.
    pub const SAVE_DIR: &'static str = "relay/save";
    /// Device id list published by the spiking simulator.
    pub const RECORDER_IDS_FILE: &'static str = "spiking/recorders.txt";
    pub const INJECTOR_IDS_FILE: &'static str = "spiking/injectors.txt";
}

/// Parameters of the coupling between the two simulators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplingConfig {
    /// Run both simulators coupled through relays.
    pub co_simulation: bool,
    /// Record the spiking simulator's output through storage relays.
    /// Meaningful when `co_simulation` is off.
    #[serde(default)]
    pub record: bool,
    /// Parallel ranks of the spiking simulator. Zero means the field
    /// simulator runs alone.
    pub nb_rank_spiking: u32,
    /// Ids of the regions coupled between the two models, index-aligned
    /// with the published device ids.
    #[serde(default)]
    pub region_ids: Vec<u64>,
    /// Logging verbosity of the orchestrator, 0 (debug) to 4 (errors only).
    pub level_log: u8,
    pub commands: CommandsConfig,
}

/// Commands the orchestrator launches. Paths are used verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    pub spiking: PathBuf,
    #[serde(default)]
    pub field: Option<PathBuf>,
    #[serde(default)]
    pub relay_into_field: Option<PathBuf>,
    #[serde(default)]
    pub relay_from_field: Option<PathBuf>,
    #[serde(default)]
    pub relay_record: Option<PathBuf>,
}

/// Parameters of the windowed recording path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Length of one synchronization window, in simulated milliseconds.
    pub synchronization: f64,
    /// Windows accumulated in memory before a flush to storage.
    pub save_step: u64,
    /// Logging verbosity of the relay daemons, 0-4.
    pub level_log: u8,
}

/// One coupled execution, as read from the parameter file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Root of the result tree. All run artifacts live below it.
    pub result_path: PathBuf,
    /// Start of the recorded interval, in simulated milliseconds.
    #[serde(default)]
    pub begin: f64,
    /// End of the simulation, in simulated milliseconds.
    pub end: f64,
    pub coupling: CouplingConfig,
    pub recording: RecordingConfig,
}

impl RunConfig {
    /// Load a parameter file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| CadenceError::Io {
            message: format!("failed to read parameter file {}", path.display()),
            path: Some(path.to_path_buf()),
            source: Some(e),
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| CadenceError::Json {
            message: format!("failed to parse {}: {e}", path.display()),
            source: Some(e),
        })?;
        if config.recording.synchronization <= 0.0 {
            return Err(CadenceError::Config {
                message: "synchronization window length must be positive".to_string(),
            });
        }
        Ok(config)
    }

    /// Write the parameter file atomically: temp file, sync, rename.
    ///
    /// A child that sees the file sees it complete.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CadenceError::Io {
                message: format!("failed to create directory {}", parent.display()),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let temp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));
        let serialized = serde_json::to_string_pretty(self)?;
        {
            let mut file = File::create(&temp_path).map_err(|e| CadenceError::Io {
                message: format!("failed to create temp file {}", temp_path.display()),
                path: Some(temp_path.clone()),
                source: Some(e),
            })?;
            file.write_all(serialized.as_bytes())
                .map_err(|e| CadenceError::Io {
                    message: format!("failed to write {}", temp_path.display()),
                    path: Some(temp_path.clone()),
                    source: Some(e),
                })?;
            file.sync_all().map_err(|e| CadenceError::Io {
                message: format!("failed to sync {}", temp_path.display()),
                path: Some(temp_path.clone()),
                source: Some(e),
            })?;
        }
        fs::rename(&temp_path, path).map_err(|e| CadenceError::Io {
            message: format!(
                "failed to rename {} to {}",
                temp_path.display(),
                path.display()
            ),
            path: Some(path.to_path_buf()),
            source: Some(e),
        })?;
        Ok(())
    }

    /// Number of synchronization windows covered by the run.
    pub fn nb_step(&self) -> u64 {
        (self.end / self.recording.synchronization).ceil() as u64
    }

    pub fn parameter_file(&self) -> PathBuf {
        self.result_path.join(PARAMETER_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.result_path.join(RunPaths::LOG_DIR)
    }

    pub fn recorder_ids_file(&self) -> PathBuf {
        self.result_path.join(RunPaths::RECORDER_IDS_FILE)
    }

    pub fn injector_ids_file(&self) -> PathBuf {
        self.result_path.join(RunPaths::INJECTOR_IDS_FILE)
    }

    /// Readiness file the field simulator publishes for one region.
    pub fn from_field_endpoint_file(&self, region: u64) -> PathBuf {
        self.result_path
            .join(RunPaths::FROM_FIELD_DIR)
            .join(format!("{region}.txt"))
    }

    /// Output stem of the storage relay attached to one recorder.
    pub fn save_stem(&self, recorder: u64) -> PathBuf {
        self.result_path
            .join(RunPaths::SAVE_DIR)
            .join(recorder.to_string())
    }
}

/// Map the parameter file's `level_log` to a tracing level.
///
/// 0 is the most verbose; 3 and 4 both map to ERROR (tracing has no
/// separate critical level).
pub fn level_from_log(level_log: u8) -> Level {
    match level_log {
        0 => Level::DEBUG,
        1 => Level::INFO,
        2 => Level::WARN,
        _ => Level::ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_config(result_path: &Path) -> RunConfig {
        RunConfig {
            result_path: result_path.to_path_buf(),
            begin: 0.0,
            end: 70.0,
            coupling: CouplingConfig {
                co_simulation: false,
                record: true,
                nb_rank_spiking: 1,
                region_ids: vec![26],
                level_log: 1,
                commands: CommandsConfig {
                    spiking: PathBuf::from("/opt/sim/spiking.sh"),
                    field: None,
                    relay_into_field: None,
                    relay_from_field: None,
                    relay_record: Some(PathBuf::from("/opt/cadence/cadence-relayd")),
                },
            },
            recording: RecordingConfig {
                synchronization: 20.0,
                save_step: 3,
                level_log: 1,
            },
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config = sample_config(temp_dir.path());
        let path = config.parameter_file();

        config.save(&path).unwrap();
        let loaded = RunConfig::load(&path).unwrap();

        assert_eq!(loaded.end, 70.0);
        assert_eq!(loaded.recording.save_step, 3);
        assert_eq!(loaded.coupling.region_ids, vec![26]);
        assert_eq!(
            loaded.coupling.commands.relay_record,
            Some(PathBuf::from("/opt/cadence/cadence-relayd"))
        );
    }

    #[test]
    fn test_nb_step_rounds_up() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = sample_config(temp_dir.path());

        // 70 / 20 = 3.5 windows, a started window counts
        assert_eq!(config.nb_step(), 4);

        config.end = 60.0;
        assert_eq!(config.nb_step(), 3);
    }

    #[test]
    fn test_load_rejects_non_positive_window() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = sample_config(temp_dir.path());
        config.recording.synchronization = 0.0;
        let path = config.parameter_file();
        config.save(&path).unwrap();

        assert!(matches!(
            RunConfig::load(&path),
            Err(CadenceError::Config { .. })
        ));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = RunConfig::load(&temp_dir.path().join("nope.json"));
        assert!(matches!(result, Err(CadenceError::Io { .. })));
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_from_log(0), Level::DEBUG);
        assert_eq!(level_from_log(1), Level::INFO);
        assert_eq!(level_from_log(2), Level::WARN);
        assert_eq!(level_from_log(3), Level::ERROR);
        assert_eq!(level_from_log(4), Level::ERROR);
    }

    #[test]
    fn test_path_helpers() {
        let temp_dir = TempDir::new().unwrap();
        let config = sample_config(temp_dir.path());

        assert!(config.recorder_ids_file().ends_with("spiking/recorders.txt"));
        assert!(config
            .from_field_endpoint_file(26)
            .ends_with("relay/from_field/26.txt"));
        assert!(config.save_stem(7).ends_with("relay/save/7"));
    }
}
