//! Scoped network namespace switching.
//!
//! Namespace membership is a per-thread attribute. [`NetnsGuard`] moves the
//! calling thread into a container's network namespace and switches it back
//! when dropped, on every exit path. The guard is `!Send`, so it cannot
//! outlive the thread it switched, and [`run_in_netns`] confines the whole
//! switch-configure-restore sequence to a dedicated worker thread that
//! nothing else ever runs on.

use std::fs::File;
use std::marker::PhantomData;
use std::path::PathBuf;

use nix::sched::{CloneFlags, setns};
use vessel_common::error::{Result, VesselError};

/// Network namespace of the calling thread.
pub const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Returns the namespace file of a process's network namespace.
#[must_use]
pub fn netns_path(pid: i32) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/net"))
}

/// Returns the identity (`net:[inode]`) of the calling thread's network
/// namespace.
///
/// # Errors
///
/// Returns an error if the namespace link cannot be read.
pub fn current_netns() -> Result<String> {
    std::fs::read_link(THREAD_NETNS)
        .map(|target| target.to_string_lossy().into_owned())
        .map_err(|e| VesselError::io(THREAD_NETNS, e))
}

/// Keeps the calling thread inside a foreign network namespace.
///
/// Dropping the guard switches the thread back to the namespace it was in
/// before [`NetnsGuard::enter`].
#[derive(Debug)]
pub struct NetnsGuard {
    original: File,
    _pinned: PhantomData<*const ()>,
}

impl NetnsGuard {
    /// Enters the network namespace of `pid`.
    ///
    /// `before_switch` runs after the target namespace is opened but while
    /// the thread is still in its original namespace; it is where a link gets
    /// moved into the target.
    ///
    /// # Errors
    ///
    /// Returns an error if either namespace cannot be opened, if
    /// `before_switch` fails, or if `setns(2)` fails. The thread is left in
    /// its original namespace in every error case.
    pub fn enter<F>(pid: i32, before_switch: F) -> Result<Self>
    where
        F: FnOnce() -> Result<()>,
    {
        let target_path = netns_path(pid);
        let target = File::open(&target_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VesselError::NotFound {
                kind: "network namespace",
                id: target_path.display().to_string(),
            },
            _ => VesselError::io(&target_path, e),
        })?;

        before_switch()?;

        let original = File::open(THREAD_NETNS).map_err(|e| VesselError::io(THREAD_NETNS, e))?;
        setns(&target, CloneFlags::CLONE_NEWNET).map_err(|e| VesselError::Syscall {
            message: format!("setns into network namespace of pid {pid}: {e}"),
        })?;
        tracing::debug!(pid, "entered container network namespace");

        Ok(Self {
            original,
            _pinned: PhantomData,
        })
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        match setns(&self.original, CloneFlags::CLONE_NEWNET) {
            Ok(()) => tracing::debug!("restored original network namespace"),
            Err(e) => tracing::error!(error = %e, "failed to restore original network namespace"),
        }
    }
}

/// Runs `configure` inside the network namespace of `pid` on a dedicated
/// worker thread.
///
/// `before_switch` runs on the worker before the switch (see
/// [`NetnsGuard::enter`]). The original namespace is restored before the
/// worker exits, whether `configure` succeeds, fails, or panics, and the
/// caller's own thread never changes namespace.
///
/// # Errors
///
/// Returns the error of `before_switch`, of the switch itself, or of
/// `configure`; a panicking worker is reported as [`VesselError::Syscall`].
pub fn run_in_netns<B, F, T>(pid: i32, before_switch: B, configure: F) -> Result<T>
where
    B: FnOnce() -> Result<()> + Send,
    F: FnOnce() -> Result<T> + Send,
    T: Send,
{
    std::thread::scope(|scope| {
        scope
            .spawn(move || {
                let _guard = NetnsGuard::enter(pid, before_switch)?;
                configure()
            })
            .join()
            .unwrap_or_else(|_| {
                Err(VesselError::Syscall {
                    message: format!("namespace worker for pid {pid} panicked"),
                })
            })
    })
}
