//! Namespace joining for executing commands in running containers.

use std::path::PathBuf;
use std::process::Command;

use nix::sys::signal::kill;
use nix::unistd::Pid;
use vessel_common::config::VesselConfig;
use vessel_common::error::{Result, VesselError};

use crate::state;

/// Joins the namespaces of the running container `name` and executes
/// `command` there with the caller's terminal attached.
///
/// The command sees the environment of the container's init process. Uses
/// `nsenter` to enter the target's mount, UTS, IPC, network, and PID
/// namespaces.
///
/// # Errors
///
/// Returns an error if the command is empty, the container is unknown or
/// not running, or `nsenter` cannot be started.
pub fn exec_in_container(config: &VesselConfig, name: &str, command: &[String]) -> Result<i32> {
    if command.is_empty() {
        return Err(VesselError::Config {
            message: "exec command is empty".into(),
        });
    }
    let info = state::load(config, name)?;
    if kill(Pid::from_raw(info.pid), None).is_err() {
        return Err(VesselError::Config {
            message: format!("container {name} is not running (pid {})", info.pid),
        });
    }
    tracing::info!(container = name, pid = info.pid, cmd = ?command, "exec into container");

    let nsenter = which::which("nsenter").map_err(|_| VesselError::NotFound {
        kind: "executable",
        id: "nsenter".into(),
    })?;
    let status = Command::new(&nsenter)
        .args(nsenter_args(info.pid))
        .args(command)
        .env_clear()
        .envs(container_environ(info.pid)?)
        .status()
        .map_err(|e| VesselError::io(&nsenter, e))?;

    let code = status.code().unwrap_or(-1);
    tracing::debug!(container = name, code, "exec finished");
    Ok(code)
}

fn nsenter_args(pid: i32) -> Vec<String> {
    let target = pid.to_string();
    [
        "--target",
        target.as_str(),
        "--mount",
        "--uts",
        "--ipc",
        "--net",
        "--pid",
        "--",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// Environment of process `pid` as `(key, value)` pairs.
///
/// # Errors
///
/// Returns an error if `/proc/<pid>/environ` cannot be read.
pub fn container_environ(pid: i32) -> Result<Vec<(String, String)>> {
    let path = PathBuf::from(format!("/proc/{pid}/environ"));
    let raw = std::fs::read(&path).map_err(|e| VesselError::io(&path, e))?;
    Ok(parse_environ(&raw))
}

fn parse_environ(raw: &[u8]) -> Vec<(String, String)> {
    raw.split(|b| *b == 0)
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            entry
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
        })
        .collect()
}
