//! Init side of the bootstrap handshake.
//!
//! Runs as the first process of a freshly cloned container (selected by the
//! `init` argument). It blocks on fd 3 until the parent has finished
//! attaching cgroups and network, then switches into the prepared root and
//! replaces itself with the user command.

use std::ffi::CString;
use std::fs::File;
use std::io::Read;
use std::os::fd::FromRawFd;
use std::os::unix::ffi::OsStrExt;

use nix::unistd::{execve, sethostname};
use vessel_common::constants::INIT_PIPE_FD;
use vessel_common::error::{Result, VesselError};

use crate::filesystem::{mount, pivot_root};
use crate::process::InitPayload;

/// Runs the container init sequence. Only returns on failure.
///
/// # Errors
///
/// Returns an error if the payload is missing or malformed, if the root
/// filesystem cannot be set up, or if the command cannot be executed.
pub fn run_init() -> Result<std::convert::Infallible> {
    let payload = read_payload()?;
    tracing::info!(command = ?payload.command, "init payload received");

    let root = std::env::current_dir().map_err(|e| VesselError::io(".", e))?;
    mount::make_private()?;
    pivot_root::pivot_root(&root)?;
    mount::mount_essential_filesystems()?;

    if let Some(hostname) = &payload.hostname {
        sethostname(hostname).map_err(|e| VesselError::Syscall {
            message: format!("sethostname {hostname}: {e}"),
        })?;
    }
    exec_command(&payload.command)
}

/// Blocks on the inherited pipe until the parent closes it.
fn read_payload() -> Result<InitPayload> {
    // SAFETY: the bootstrapper installs the pipe read end on this fd before
    // exec and nothing else in this process owns it.
    let mut pipe = unsafe { File::from_raw_fd(INIT_PIPE_FD) };
    let mut raw = String::new();
    pipe.read_to_string(&mut raw)
        .map_err(|e| VesselError::io("init pipe", e))?;
    parse_payload(&raw)
}

/// Parses the payload written by the parent.
///
/// # Errors
///
/// Returns [`VesselError::Malformed`] if the payload is empty, is not valid
/// JSON, or carries no command.
pub fn parse_payload(raw: &str) -> Result<InitPayload> {
    if raw.trim().is_empty() {
        return Err(VesselError::Malformed {
            what: "init payload",
            message: "parent closed the pipe without sending a command".into(),
        });
    }
    let payload: InitPayload = serde_json::from_str(raw).map_err(|e| VesselError::Malformed {
        what: "init payload",
        message: e.to_string(),
    })?;
    if payload.command.is_empty() {
        return Err(VesselError::Malformed {
            what: "init payload",
            message: "empty command".into(),
        });
    }
    Ok(payload)
}

fn exec_command(command: &[String]) -> Result<std::convert::Infallible> {
    let path = which::which(&command[0]).map_err(|_| VesselError::NotFound {
        kind: "executable",
        id: command[0].clone(),
    })?;
    let program = CString::new(path.as_os_str().as_bytes()).map_err(malformed_arg)?;
    let argv = command
        .iter()
        .map(|arg| CString::new(arg.as_bytes()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(malformed_arg)?;
    let envp = std::env::vars_os()
        .map(|(key, value)| {
            let mut pair = key.as_bytes().to_vec();
            pair.push(b'=');
            pair.extend_from_slice(value.as_bytes());
            CString::new(pair)
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(malformed_arg)?;

    tracing::debug!(path = %path.display(), "executing container command");
    execve(&program, &argv, &envp).map_err(|e| VesselError::Syscall {
        message: format!("execve {}: {e}", path.display()),
    })
}

fn malformed_arg(e: std::ffi::NulError) -> VesselError {
    VesselError::Malformed {
        what: "command argument",
        message: e.to_string(),
    }
}
