//! Container root filesystem preparation.
//!
//! A workspace is an `OverlayFS` mount of the image directory with a
//! per-container writable layer, plus an optional host directory bound into
//! it as a volume.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use vessel_common::config::VesselConfig;
use vessel_common::error::{Result, VesselError};
use vessel_core::filesystem::mount::{bind_mount, unmount};
use vessel_core::filesystem::overlayfs::{OverlayConfig, mount_overlay, teardown_overlay};

/// A `host:container` directory binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Directory on the host; created if missing.
    pub host: PathBuf,
    /// Absolute path inside the container.
    pub container: PathBuf,
}

impl FromStr for Volume {
    type Err = VesselError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || VesselError::Malformed {
            what: "volume",
            message: format!("expected /host/dir:/container/dir, got {s:?}"),
        };
        let (host, container) = s.split_once(':').ok_or_else(malformed)?;
        if host.is_empty() || container.is_empty() || container.contains(':') {
            return Err(malformed());
        }
        let container = Path::new(container);
        if !container.is_absolute() || container.components().any(|c| c.as_os_str() == "..") {
            return Err(malformed());
        }
        Ok(Self {
            host: PathBuf::from(host),
            container: container.to_path_buf(),
        })
    }
}

/// Mounted root filesystem of one container.
#[derive(Debug, Clone)]
pub struct Workspace {
    overlay: OverlayConfig,
    layer_dir: PathBuf,
    volume: Option<Volume>,
}

impl Workspace {
    /// Lays out the workspace of container `name` over `image`.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::Malformed`] if `volume` is not a valid
    /// `host:container` pair.
    pub fn new(config: &VesselConfig, image: &str, name: &str, volume: Option<&str>) -> Result<Self> {
        let volume = volume
            .filter(|v| !v.is_empty())
            .map(str::parse::<Volume>)
            .transpose()?;
        let layer_dir = config.layer_dir(name);
        Ok(Self {
            overlay: OverlayConfig::single_layer(
                &config.image_dir(image),
                &layer_dir,
                &config.mount_dir(name),
            ),
            layer_dir,
            volume,
        })
    }

    /// Merged root filesystem handed to the container.
    #[must_use]
    pub fn rootfs(&self) -> &Path {
        &self.overlay.merged_dir
    }

    /// Mount point of the volume inside the merged root.
    #[must_use]
    pub fn volume_target(&self) -> Option<PathBuf> {
        self.volume.as_ref().map(|v| {
            self.overlay
                .merged_dir
                .join(v.container.strip_prefix("/").unwrap_or(&v.container))
        })
    }

    /// Mounts the overlay and binds the volume.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::NotFound`] if the image directory is missing,
    /// or the first mount failure. Nothing created here outlives a failure.
    pub fn prepare(&self) -> Result<()> {
        for image in &self.overlay.lower_dirs {
            if !image.is_dir() {
                return Err(VesselError::NotFound {
                    kind: "image",
                    id: image.display().to_string(),
                });
            }
        }
        if let Err(e) = mount_overlay(&self.overlay) {
            self.remove_layer_dir_logged();
            return Err(e);
        }

        if let (Some(volume), Some(target)) = (&self.volume, self.volume_target()) {
            let bound = std::fs::create_dir_all(&volume.host)
                .map_err(|e| VesselError::io(&volume.host, e))
                .and_then(|()| bind_mount(&volume.host, &target, false));
            if let Err(e) = bound {
                if let Err(cleanup) = teardown_overlay(&self.overlay) {
                    tracing::warn!(error = %cleanup, "rollback of overlay failed");
                }
                self.remove_layer_dir_logged();
                return Err(e);
            }
            tracing::info!(host = %volume.host.display(), target = %target.display(), "volume bound");
        }
        Ok(())
    }

    /// Unbinds the volume and removes the overlay with its writable layer.
    ///
    /// The host side of the volume is left untouched.
    ///
    /// # Errors
    ///
    /// Returns the collected failures.
    pub fn teardown(&self) -> Result<()> {
        let mut errors = Vec::new();
        if let Some(target) = self.volume_target() {
            if let Err(e) = unmount(&target) {
                errors.push(e);
            }
        }
        if let Err(e) = teardown_overlay(&self.overlay) {
            errors.push(e);
        }
        if let Err(e) = self.remove_layer_dir() {
            errors.push(e);
        }
        VesselError::collect(errors)
    }

    fn remove_layer_dir(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.layer_dir) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(VesselError::io(&self.layer_dir, e)),
            _ => Ok(()),
        }
    }

    fn remove_layer_dir_logged(&self) {
        if let Err(e) = self.remove_layer_dir() {
            tracing::warn!(error = %e, "writable layer left behind");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_splits_host_and_container_paths() {
        let v: Volume = "/srv/data:/data".parse().unwrap();
        assert_eq!(v.host, PathBuf::from("/srv/data"));
        assert_eq!(v.container, PathBuf::from("/data"));
    }

    #[test]
    fn volume_rejects_relative_or_escaping_targets() {
        for bad in ["/srv", "/srv:data", "/srv:/../etc", ":/data", "/srv:", "/a:/b:/c"] {
            assert!(bad.parse::<Volume>().is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn layout_follows_the_data_directory() {
        let cfg = VesselConfig::new("/run/v", "/data/v");
        let ws = Workspace::new(&cfg, "busybox", "web", Some("/srv:/srv/www")).unwrap();
        assert_eq!(ws.rootfs(), Path::new("/data/v/mnt/web"));
        assert_eq!(ws.volume_target(), Some(PathBuf::from("/data/v/mnt/web/srv/www")));
    }

    #[test]
    fn empty_volume_means_none() {
        let cfg = VesselConfig::new("/run/v", "/data/v");
        let ws = Workspace::new(&cfg, "busybox", "web", Some("")).unwrap();
        assert!(ws.volume_target().is_none());
    }

    #[test]
    fn missing_image_is_not_found_and_mounts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = VesselConfig::new(dir.path().join("run"), dir.path().join("data"));
        let ws = Workspace::new(&cfg, "absent", "web", None).unwrap();

        let err = ws.prepare().unwrap_err();
        assert!(err.is_not_found());
        assert!(!cfg.mount_dir("web").exists());
    }

    #[test]
    fn failed_overlay_mount_leaves_no_directories() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = VesselConfig::new(dir.path().join("run"), dir.path().join("data"));
        // A colon splits lowerdir, so the mount is refused even as root.
        std::fs::create_dir_all(cfg.image_dir("bad:image")).unwrap();
        let ws = Workspace::new(&cfg, "bad:image", "w", None).unwrap();

        assert!(ws.prepare().is_err());
        assert!(!cfg.layer_dir("w").exists());
        assert!(!cfg.mount_dir("w").exists());
    }
}
