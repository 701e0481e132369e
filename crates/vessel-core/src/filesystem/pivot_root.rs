//! Secure root filesystem switching via `pivot_root(2)`.
//!
//! More secure than `chroot` because it actually changes the root mount
//! point rather than just the process's view of `/`.

use std::path::Path;

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::unistd::{chdir, pivot_root as sys_pivot_root};
use vessel_common::error::{Result, VesselError};

use super::mount::ensure_dir;

/// Directory under the new root that temporarily holds the old root.
const PUT_OLD: &str = ".pivot_root";

/// Makes `new_root` the root filesystem of the calling mount namespace.
///
/// `new_root` is bind-mounted onto itself first, since `pivot_root(2)`
/// requires the new root to be a mount point. The old root is detached
/// and its temporary directory removed.
///
/// # Errors
///
/// Returns an error if any mount, `pivot_root(2)`, `chdir(2)`, or the
/// cleanup of the old root fails.
pub fn pivot_root(new_root: &Path) -> Result<()> {
    mount(
        Some(new_root),
        new_root,
        Some("bind"),
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| VesselError::Syscall {
        message: format!("bind {} onto itself: {e}", new_root.display()),
    })?;

    let put_old = new_root.join(PUT_OLD);
    ensure_dir(&put_old)?;
    sys_pivot_root(new_root, &put_old).map_err(|e| VesselError::Syscall {
        message: format!("pivot_root to {}: {e}", new_root.display()),
    })?;
    chdir("/").map_err(|e| VesselError::Syscall {
        message: format!("chdir /: {e}"),
    })?;

    let old_root = Path::new("/").join(PUT_OLD);
    umount2(&old_root, MntFlags::MNT_DETACH).map_err(|e| VesselError::Syscall {
        message: format!("detach old root: {e}"),
    })?;
    std::fs::remove_dir(&old_root).map_err(|e| VesselError::io(&old_root, e))?;

    tracing::info!(new_root = %new_root.display(), "root filesystem pivoted");
    Ok(())
}
