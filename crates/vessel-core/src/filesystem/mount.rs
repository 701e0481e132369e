//! Mount utilities for container filesystem setup.
//!
//! Handles mount propagation, `/proc` and `/dev` inside the container's
//! mount namespace, and bind mounts for volumes.

use std::fs;
use std::path::Path;

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use vessel_common::error::{Result, VesselError};

const NONE: Option<&str> = None;

/// Makes every mount in the current namespace private, recursively.
///
/// Without this, mounts made by init would propagate back to the host
/// through shared peer groups.
///
/// # Errors
///
/// Returns an error if the remount fails.
pub fn make_private() -> Result<()> {
    mount(NONE, "/", NONE, MsFlags::MS_PRIVATE | MsFlags::MS_REC, NONE).map_err(|e| {
        VesselError::Syscall {
            message: format!("make / private: {e}"),
        }
    })
}

/// Mounts `/proc` and a tmpfs `/dev` relative to the current root.
///
/// # Errors
///
/// Returns an error if a mount point cannot be created or a mount fails.
pub fn mount_essential_filesystems() -> Result<()> {
    ensure_dir(Path::new("/proc"))?;
    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        NONE,
    )
    .map_err(|e| VesselError::Syscall {
        message: format!("mount /proc: {e}"),
    })?;

    ensure_dir(Path::new("/dev"))?;
    mount(
        Some("tmpfs"),
        "/dev",
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .map_err(|e| VesselError::Syscall {
        message: format!("mount /dev: {e}"),
    })?;
    tracing::debug!("essential filesystems mounted");
    Ok(())
}

/// Creates a recursive bind mount from `source` to `target`.
///
/// The target directory is created if missing.
///
/// # Errors
///
/// Returns an error if the target cannot be created or `mount(2)` fails.
pub fn bind_mount(source: &Path, target: &Path, readonly: bool) -> Result<()> {
    ensure_dir(target)?;
    mount(Some(source), target, NONE, MsFlags::MS_BIND | MsFlags::MS_REC, NONE).map_err(|e| {
        VesselError::Syscall {
            message: format!("bind {} to {}: {e}", source.display(), target.display()),
        }
    })?;
    if readonly {
        mount(
            NONE,
            target,
            NONE,
            MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_RDONLY,
            NONE,
        )
        .map_err(|e| VesselError::Syscall {
            message: format!("remount {} read-only: {e}", target.display()),
        })?;
    }
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        readonly,
        "bind mount created"
    );
    Ok(())
}

/// Lazily detaches the filesystem mounted at `target`.
///
/// # Errors
///
/// Returns an error if `umount2(2)` fails.
pub fn unmount(target: &Path) -> Result<()> {
    umount2(target, MntFlags::MNT_DETACH).map_err(|e| VesselError::Syscall {
        message: format!("unmount {}: {e}", target.display()),
    })?;
    tracing::debug!(target = %target.display(), "unmounted");
    Ok(())
}

pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| VesselError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_dir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b");
        ensure_dir(&target).unwrap();
        ensure_dir(&target).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn unmount_of_plain_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = unmount(dir.path()).unwrap_err();
        assert!(matches!(err, VesselError::Syscall { .. }));
    }
}
