//! Detached launching of run participants.
//!
//! Children run in their own session (Unix) or process group (Windows)
//! with stdout/stderr wired to a per-child log file. A child must not
//! share our controlling terminal and must not turn into a zombie tied to
//! our exit.

use crate::{CadenceError, Result};
use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use tracing::info;

#[cfg(unix)]
use std::os::unix::process::CommandExt;
#[cfg(windows)]
use std::os::windows::process::CommandExt;

/// Specification of one child process.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    /// Short name used in logs and failure reports.
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// stdout/stderr destination; null when absent.
    pub log_file: Option<PathBuf>,
}

impl ChildSpec {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            log_file: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// A spawned, detached child.
#[derive(Debug)]
pub struct ProcessHandle {
    pub name: String,
    pub pid: u32,
    child: Child,
}

impl ProcessHandle {
    /// Block until the child exits. Call from a blocking context.
    pub fn wait(mut self) -> Result<ExitStatus> {
        self.child.wait().map_err(|e| CadenceError::Io {
            message: format!("failed to wait for {}", self.name),
            path: None,
            source: Some(e),
        })
    }
}

/// Spawn `spec` detached from this process.
#[allow(unsafe_code)] // owns the fork/exec boundary; see SAFETY below
pub fn launch(spec: &ChildSpec) -> Result<ProcessHandle> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    cmd.current_dir(&spec.working_dir);
    cmd.stdin(Stdio::null());

    match &spec.log_file {
        Some(log_file) => {
            if let Some(parent) = log_file.parent() {
                fs::create_dir_all(parent).ok();
            }
            let file = File::create(log_file).map_err(|e| CadenceError::Io {
                message: "failed to create child log file".to_string(),
                path: Some(log_file.clone()),
                source: Some(e),
            })?;
            let stderr_file = file.try_clone().map_err(|e| CadenceError::Io {
                message: "failed to clone child log handle".to_string(),
                path: Some(log_file.clone()),
                source: Some(e),
            })?;
            cmd.stdout(Stdio::from(file));
            cmd.stderr(Stdio::from(stderr_file));
        }
        None => {
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());
        }
    }

    #[cfg(unix)]
    {
        // SAFETY: setsid() is async-signal-safe and is the only call made
        // between fork and exec.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    let child = cmd.spawn().map_err(|e| CadenceError::LaunchFailed {
        name: spec.name.clone(),
        message: format!("{}: {e}", spec.program.display()),
    })?;

    let pid = child.id();
    info!(
        "launched {} (pid {pid}): {} {}",
        spec.name,
        spec.program.display(),
        spec.args.join(" ")
    );
    Ok(ProcessHandle {
        name: spec.name.clone(),
        pid,
        child,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_child_spec_builder() {
        let spec = ChildSpec::new("spiking", "/opt/sim/spiking.sh", "/run")
            .arg("/run")
            .arg("4")
            .arg("1")
            .log_file("/run/log/spiking.log");

        assert_eq!(spec.name, "spiking");
        assert_eq!(spec.args, vec!["/run", "4", "1"]);
        assert_eq!(spec.log_file, Some(PathBuf::from("/run/log/spiking.log")));
    }

    #[test]
    fn test_launch_missing_program_fails() {
        let temp_dir = TempDir::new().unwrap();
        let spec = ChildSpec::new("ghost", "/nonexistent/program", temp_dir.path());

        assert!(matches!(
            launch(&spec),
            Err(CadenceError::LaunchFailed { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_launch_and_wait_captures_exit_status() {
        let temp_dir = TempDir::new().unwrap();

        let ok = ChildSpec::new("ok", "/bin/sh", temp_dir.path())
            .arg("-c")
            .arg("exit 0");
        let status = launch(&ok).unwrap().wait().unwrap();
        assert_eq!(status.code(), Some(0));

        let failing = ChildSpec::new("failing", "/bin/sh", temp_dir.path())
            .arg("-c")
            .arg("exit 3");
        let status = launch(&failing).unwrap().wait().unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_launch_redirects_output_to_log_file() {
        let temp_dir = TempDir::new().unwrap();
        let log_file = temp_dir.path().join("log").join("echo.log");

        let spec = ChildSpec::new("echo", "/bin/sh", temp_dir.path())
            .arg("-c")
            .arg("echo hello")
            .log_file(&log_file);
        launch(&spec).unwrap().wait().unwrap();

        let contents = fs::read_to_string(&log_file).unwrap();
        assert_eq!(contents.trim(), "hello");
    }
}
