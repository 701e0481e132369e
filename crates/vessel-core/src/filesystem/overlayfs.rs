//! `OverlayFS` management for layered container filesystems.
//!
//! A container root is a read-only image directory with a per-container
//! writable upper layer stacked on top, merged at the mount point handed
//! to the process bootstrapper.

use std::path::{Path, PathBuf};

use nix::mount::{MsFlags, mount};
use vessel_common::error::{Result, VesselError};

use super::mount::{ensure_dir, unmount};

/// Configuration for an `OverlayFS` mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Read-only lower layers, topmost first.
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`, on the same filesystem as
    /// `upper_dir`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Layout for one image layer under a container's layer directory.
    #[must_use]
    pub fn single_layer(image: &Path, layer_dir: &Path, merged_dir: &Path) -> Self {
        Self {
            lower_dirs: vec![image.to_path_buf()],
            upper_dir: layer_dir.join("upper"),
            work_dir: layer_dir.join("work"),
            merged_dir: merged_dir.to_path_buf(),
        }
    }

    /// Returns the `mount(2)` data string for this overlay.
    #[must_use]
    pub fn mount_options(&self) -> String {
        let lowers = self
            .lower_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        format!(
            "lowerdir={lowers},upperdir={},workdir={}",
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }
}

/// Mounts an `OverlayFS` with the given configuration.
///
/// Creates the upper, work, and merged directories if they do not exist.
///
/// # Errors
///
/// Returns an error if there are no lower layers, if directory creation
/// fails, or if the mount syscall fails.
pub fn mount_overlay(config: &OverlayConfig) -> Result<()> {
    if config.lower_dirs.is_empty() {
        return Err(VesselError::Config {
            message: "overlay needs at least one lower layer".into(),
        });
    }
    for dir in [&config.upper_dir, &config.work_dir, &config.merged_dir] {
        ensure_dir(dir)?;
    }

    let opts = config.mount_options();
    mount(
        Some("overlay"),
        &config.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(opts.as_str()),
    )
    .map_err(|e| {
        if let Err(cleanup) = VesselError::collect(remove_dirs(config)) {
            tracing::warn!(error = %cleanup, "overlay directories left after failed mount");
        }
        VesselError::Syscall {
            message: format!("overlay mount at {}: {e}", config.merged_dir.display()),
        }
    })?;

    tracing::info!(merged = %config.merged_dir.display(), "overlayfs mounted");
    Ok(())
}

/// Unmounts the overlay and removes its merged, work, and upper
/// directories.
///
/// Every step is attempted even if an earlier one fails.
///
/// # Errors
///
/// Returns the collected failures.
pub fn teardown_overlay(config: &OverlayConfig) -> Result<()> {
    let mut errors = Vec::new();
    if let Err(e) = unmount(&config.merged_dir) {
        tracing::warn!(error = %e, "overlay unmount failed");
        errors.push(e);
    }
    errors.extend(remove_dirs(config));
    tracing::info!(merged = %config.merged_dir.display(), "overlayfs torn down");
    VesselError::collect(errors)
}

fn remove_dirs(config: &OverlayConfig) -> Vec<VesselError> {
    [&config.merged_dir, &config.work_dir, &config.upper_dir]
        .into_iter()
        .filter_map(|dir| match std::fs::remove_dir_all(dir) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Some(VesselError::io(dir.clone(), e)),
            _ => None,
        })
        .collect()
}
