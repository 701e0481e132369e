//! Two-phase container process bootstrap.
//!
//! Phase one ([`spawn`]) clones the running binary into fresh namespaces
//! with the read end of a pipe installed as fd 3 and the sentinel `init`
//! argument. The child blocks on that pipe. While it waits, the caller
//! attaches cgroups and wires the network to the now-known pid. Phase two
//! ([`ParentProcess::signal`]) writes the [`InitPayload`] and closes the
//! pipe, which releases the child to execute the user command.

use std::ffi::{CString, OsStr};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use nix::fcntl::OFlag;
use nix::sched::{CloneFlags, clone};
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Pid, execve, pipe2};
use serde::{Deserialize, Serialize};
use vessel_common::constants::{INIT_ARG, INIT_PIPE_FD};
use vessel_common::error::{Result, VesselError};

use crate::namespace::NamespaceConfig;

/// Stack handed to the cloned child; it only lives until `execve`.
const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Exit code of a child that failed before `execve`.
const EXIT_BOOTSTRAP_FAILED: isize = 127;

/// What the parent sends to the init process once the container is wired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitPayload {
    /// Command and arguments to execute.
    pub command: Vec<String>,
    /// Hostname to set inside the UTS namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// How to launch the isolated child.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Attach the child to the caller's terminal instead of a log file.
    pub interactive: bool,
    /// Prepared root filesystem; becomes the child's working directory.
    pub rootfs: PathBuf,
    /// Output file for detached children. Its directory is created.
    pub log_file: Option<PathBuf>,
    /// `KEY=VALUE` pairs appended to the inherited environment.
    pub env: Vec<String>,
    /// Namespaces to create.
    pub namespaces: NamespaceConfig,
}

/// Handle to a cloned child waiting for its payload.
#[derive(Debug)]
pub struct ParentProcess {
    pid: Pid,
    writer: Option<File>,
}

/// Argument vectors prepared before cloning so the child allocates nothing.
struct ChildExec {
    exe: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    rootfs: CString,
}

/// Clones the current executable into new namespaces in init mode.
///
/// # Errors
///
/// Returns an error if the executable path, log file, or pipe cannot be
/// prepared, or if `clone(2)` fails.
pub fn spawn(config: &BootstrapConfig) -> Result<ParentProcess> {
    let exe_path = fs::read_link("/proc/self/exe").map_err(|e| VesselError::io("/proc/self/exe", e))?;
    let exec = ChildExec {
        exe: c_string(exe_path.as_os_str())?,
        argv: vec![c_string(exe_path.as_os_str())?, c_string(OsStr::new(INIT_ARG))?],
        envp: child_environment(&config.env)?,
        rootfs: c_string(config.rootfs.as_os_str())?,
    };

    let log = match (&config.log_file, config.interactive) {
        (Some(path), false) => Some(open_log(path)?),
        _ => None,
    };

    let (reader, writer) = pipe2(OFlag::O_CLOEXEC).map_err(|e| VesselError::Syscall {
        message: format!("pipe2: {e}"),
    })?;

    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    let reader_fd = reader.as_raw_fd();
    let log_fd = log.as_ref().map(AsRawFd::as_raw_fd);
    let child = Box::new(|| child_main(&exec, reader_fd, log_fd));

    // SAFETY: the child gets a copy-on-write address space (no CLONE_VM) and
    // only performs dup2/fcntl/chdir/execve on buffers built above.
    let pid = unsafe {
        clone(
            child,
            &mut stack,
            config.namespaces.clone_flags(),
            Some(Signal::SIGCHLD as i32),
        )
    }
    .map_err(|e| VesselError::Syscall {
        message: format!("clone into new namespaces: {e}"),
    })?;
    drop(reader);

    tracing::info!(pid = pid.as_raw(), rootfs = %config.rootfs.display(), "container process cloned");
    Ok(ParentProcess {
        pid,
        writer: Some(File::from(writer)),
    })
}

impl ParentProcess {
    /// Host pid of the child.
    #[must_use]
    pub const fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// Sends the payload and closes the pipe, releasing the child.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload was already sent or the write fails.
    pub fn signal(&mut self, payload: &InitPayload) -> Result<()> {
        let mut writer = self.writer.take().ok_or_else(|| VesselError::Config {
            message: format!("init payload already sent to pid {}", self.pid),
        })?;
        serde_json::to_writer(&mut writer, payload)?;
        writer
            .flush()
            .map_err(|e| VesselError::io("init pipe", e))?;
        tracing::debug!(pid = self.pid.as_raw(), command = ?payload.command, "init payload sent");
        Ok(())
    }

    /// Blocks until the child exits and returns its exit code.
    ///
    /// A child killed by a signal reports `128 + signal`.
    ///
    /// # Errors
    ///
    /// Returns an error if `waitpid(2)` fails.
    pub fn wait(&self) -> Result<i32> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(code),
                Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => {}
                Err(e) => {
                    return Err(VesselError::Syscall {
                        message: format!("waitpid {}: {e}", self.pid),
                    });
                }
            }
        }
    }

    /// Kills the child and reaps it. Used to roll back a failed start.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be delivered.
    pub fn kill(&mut self) -> Result<()> {
        drop(self.writer.take());
        kill(self.pid, Signal::SIGKILL).map_err(|e| VesselError::Syscall {
            message: format!("kill {}: {e}", self.pid),
        })?;
        let _ = self.wait();
        tracing::info!(pid = self.pid.as_raw(), "container process killed");
        Ok(())
    }
}

fn child_main(exec: &ChildExec, reader: RawFd, log: Option<RawFd>) -> isize {
    // SAFETY: plain descriptor and path syscalls on values owned by the
    // parent's copied address space; no allocation happens before execve.
    unsafe {
        // The log may itself sit on fd 3, so it is duplicated first.
        if let Some(log) = log {
            if libc::dup2(log, libc::STDOUT_FILENO) < 0 || libc::dup2(log, libc::STDERR_FILENO) < 0 {
                return EXIT_BOOTSTRAP_FAILED;
            }
        }
        if reader == INIT_PIPE_FD {
            if libc::fcntl(reader, libc::F_SETFD, 0) < 0 {
                return EXIT_BOOTSTRAP_FAILED;
            }
        } else if libc::dup2(reader, INIT_PIPE_FD) < 0 {
            return EXIT_BOOTSTRAP_FAILED;
        }
        if libc::chdir(exec.rootfs.as_ptr()) < 0 {
            return EXIT_BOOTSTRAP_FAILED;
        }
    }
    let _ = execve(&exec.exe, &exec.argv, &exec.envp);
    EXIT_BOOTSTRAP_FAILED
}

fn open_log(path: &Path) -> Result<OwnedFd> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| VesselError::io(parent, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| VesselError::io(path, e))?;
    tracing::debug!(path = %path.display(), "container output redirected");
    Ok(OwnedFd::from(file))
}

/// Inherited environment followed by the user's additions.
fn child_environment(extra: &[String]) -> Result<Vec<CString>> {
    std::env::vars_os()
        .map(|(key, value)| {
            let mut pair = key;
            pair.push("=");
            pair.push(value);
            c_string(&pair)
        })
        .chain(extra.iter().map(|pair| c_string(OsStr::new(pair))))
        .collect()
}

fn c_string(value: &OsStr) -> Result<CString> {
    CString::new(value.as_bytes()).map_err(|e| VesselError::Malformed {
        what: "process argument",
        message: e.to_string(),
    })
}
